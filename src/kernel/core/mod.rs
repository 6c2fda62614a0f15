// src/kernel/core/mod.rs
//! カーネルコア定義

pub mod result;
pub mod types;

pub use result::{DeviceError, ErrorKind, FsError, KernelError, KernelResult, ProcessError};
pub use types::{Pid, TerminalId};
