//! netport: OS and hardware adaptation for an embedded TCP/IP stack on
//! a micro T-Kernel style RTOS.
//!
//!   sys    - semaphores, mailboxes, protection lock, threads, clock
//!   mem    - receive buffer pool with ownership tracking
//!   hal    - Ethernet MAC driver, interrupt bridge, event channel
//!   netif  - interface bring-up, receive task, link output, multicast filters
//!   config - build-time constants and runtime configuration
#![no_std]
#![allow(dead_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod hal;
pub mod mem;
pub mod netif;
pub mod sys;
