/// Build-time constants and construction-time configuration.
///
/// Defaults match the board support packages this port ships with:
/// eight free receive buffers of 1536 bytes, a 2 s transmit completion
/// bound, a 32-block mailbox pool, receive task at priority 12.
use core::ptr::NonNull;

use static_assertions::const_assert;

// ---- Receive buffers ----

/// Receive buffers pre-loaded into the free queue of one MAC.
/// The hardware descriptors get their own complement on top of these.
pub const DEV_RBUF_NUM: usize = 8;

/// Size of one receive buffer slot.
pub const RX_BUF_SIZE: usize = 1536;

/// DMA alignment of every receive buffer.
pub const RX_BUF_ALIGN: usize = 32;

/// Largest Ethernet frame (header + payload, no FCS).
pub const ETH_MAX_FRAME_LENGTH: usize = 1514;

/// Smallest frame the MAC hands up (padded minimum, no FCS).
pub const ETH_MIN_FRAME_LENGTH: usize = 60;

/// Interface-side frame buffer size, used for the transmit buffer and
/// the receive size negotiated with the device.
pub const ETHER_DRV_BUFF_SIZE: usize = 1520;

/// Capacity of the interrupt → task event channel.
pub const RX_EVENT_DEPTH: usize = 16;

// ---- Timing ----

/// Transmit completion bound in milliseconds.
pub const DEV_NET_TMOUT: u32 = 2000;

// ---- Kernel objects ----

/// Blocks in the process-wide mailbox message pool.
pub const MAX_MAILBOX_BLOCKS: usize = 32;

/// Semaphores the port may hold at once.
pub const MAX_SEMAPHORES: usize = 32;

/// Mailboxes the port may hold at once.
pub const MAX_MAILBOXES: usize = 16;

pub const DEFAULT_THREAD_STACKSIZE: usize = 2048;
pub const DEFAULT_THREAD_PRIO: u8 = 15;
pub const TCPIP_THREAD_PRIO: u8 = 11;
pub const NETIF_THREAD_PRIO: u8 = 12;

// ---- Interface ----

pub const NETIF_MTU: u16 = 1500;

/// Hardware multicast table capacity. Longer lists fall back to
/// accept-all-multicast.
pub const MCAST_TABLE_MAX: usize = 32;

/// Device name prefix; unit `n` registers as `net` + ('a' + n).
pub const DEVNAME_NET: &str = "net";

/// Number of net units the device table can hold (`neta`..`netc`).
pub const NET_UNIT_MAX: usize = 3;

// The event channel is a power-of-two lock-free queue and must never be
// the reason a frame is dropped when the pool itself still has room.
const_assert!(RX_EVENT_DEPTH.is_power_of_two());
const_assert!(RX_EVENT_DEPTH >= 2 * DEV_RBUF_NUM);
const_assert!(RX_BUF_SIZE % RX_BUF_ALIGN == 0);
const_assert!(ETH_MAX_FRAME_LENGTH <= ETHER_DRV_BUFF_SIZE);
const_assert!(ETHER_DRV_BUFF_SIZE <= RX_BUF_SIZE);
const_assert!(RX_BUF_SIZE <= u16::MAX as usize);

/// Where the receive buffers live.
///
/// Some MACs cannot reach every RAM bank with DMA (the STM32H7 Ethernet
/// DMA cannot see DTCM/ITCM), so boards hand in a dedicated region.
#[derive(Debug, Clone, Copy)]
pub enum BufferPlacement {
    /// Allocate from the global allocator.
    Heap,
    /// Carve from a fixed memory region.
    Region { base: NonNull<u8>, len: usize },
}

// The region is only ever touched through the buffer arena.
unsafe impl Send for BufferPlacement {}
unsafe impl Sync for BufferPlacement {}

impl BufferPlacement {
    /// Place buffers in `base..base + len`.
    ///
    /// # Safety
    /// The range must be RAM reachable by the MAC's DMA engine and must not
    /// be used by anything else for the lifetime of the program.
    pub unsafe fn region(base: usize, len: usize) -> Option<Self> {
        NonNull::new(base as *mut u8).map(|base| BufferPlacement::Region { base, len })
    }

    /// Place buffers in one of the [`boards`] presets.
    ///
    /// # Safety
    /// Same contract as [`BufferPlacement::region`].
    pub unsafe fn board(preset: (usize, usize)) -> Option<Self> {
        Self::region(preset.0, preset.1)
    }
}

/// DMA-reachable receive buffer regions per board: `(base, len)`.
pub mod boards {
    /// STM32H743I-EVAL: SRAM3 above the driver's descriptor area.
    pub const EVAL_STM32H743I: (usize, usize) = (0x3004_4000, 0x8000);
    /// NUCLEO-H723ZG: AXI SRAM above the driver's descriptor area.
    pub const NUCLEO_STM32H723ZGT6: (usize, usize) = (0x2400_4000, 0x8000);
    /// NUCLEO-H742ZI / NUCLEO-H743ZI: SRAM1.
    pub const NUCLEO_STM32H743ZIT6: (usize, usize) = (0x3000_0000, 0x8000);
    /// Kinetis K60/K70 tower boards: IMEM.
    pub const TWR_K60: (usize, usize) = (0x1FFF_0000, 0x8000);
}

/// OS-primitive layer configuration.
#[derive(Debug, Clone)]
pub struct SysConfig {
    pub mailbox_blocks: usize,
    pub max_semaphores: usize,
    pub max_mailboxes: usize,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            mailbox_blocks: MAX_MAILBOX_BLOCKS,
            max_semaphores: MAX_SEMAPHORES,
            max_mailboxes: MAX_MAILBOXES,
        }
    }
}

/// Device-layer configuration for one MAC.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Unit number; the device registers as `net` + ('a' + unit).
    pub unit: usize,
    /// Buffers pre-loaded into the free queue.
    pub rx_buffers: usize,
    pub placement: BufferPlacement,
    /// Transmit completion bound (0 = wait forever).
    pub tx_timeout_ms: u32,
    /// Priority restored when the MAC interrupt line is unmasked.
    pub irq_priority: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            unit: 0,
            rx_buffers: DEV_RBUF_NUM,
            placement: BufferPlacement::Heap,
            tx_timeout_ms: DEV_NET_TMOUT,
            irq_priority: 10,
        }
    }
}

/// Interface-layer configuration.
#[derive(Debug, Clone)]
pub struct NetifConfig {
    /// Channel: selects device `net` + ('a' + channel) and name `'0' + channel`.
    pub channel: u8,
    pub rx_task_priority: u8,
    pub rx_task_stack: usize,
    /// Event channel depth (capped at [`RX_EVENT_DEPTH`]).
    pub event_depth: usize,
    /// Bytes reserved in front of the transmit buffer for the MAC driver.
    pub tx_headroom: usize,
    /// Join the IPv6 all-nodes groups at bring-up.
    pub ipv6: bool,
    /// Hand PPPoE discovery/session frames to the stack.
    pub pppoe: bool,
    pub hostname: &'static str,
}

impl Default for NetifConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            rx_task_priority: NETIF_THREAD_PRIO,
            rx_task_stack: DEFAULT_THREAD_STACKSIZE,
            event_depth: 2 * DEV_RBUF_NUM,
            tx_headroom: 0,
            ipv6: false,
            pppoe: true,
            hostname: "lwip",
        }
    }
}
