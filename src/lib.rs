//! Backing-store driver subsystem for a Linux container runtime.
//!
//! This crate provides the pluggable storage layer containers use for their root filesystems:
//! a [`backend::Backend`] trait implemented once per supported storage technology
//! ([`backends`]), a [`registry`] that detects which backend a given source string names and
//! dispatches to it, a [`clone`] orchestrator that drives container creation and cloning
//! (including copy-on-write snapshots where the backend supports them), a [`lock`] module for
//! cross-process container locking, and an [`nbd_supervisor`] for attaching and supervising
//! `qemu-nbd` connections.

pub mod backend;
pub mod backends;
pub mod child;
pub mod clone;
pub mod config;
pub mod error;
pub mod fstype;
pub mod handle;
pub mod lock;
pub mod mount_opts;
pub mod nbd_supervisor;
pub mod registry;
pub mod source;
pub mod specs;
