// src/kernel/core/types.rs
//! カーネル共通型定義

/// プロセス ID
///
/// PID はビットマップで割り当てられ、PCB アリーナの添字として使われます。
/// 「タスクなし」は `Option<Pid>` の `None` で表現します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub usize);

impl Pid {
    /// PCB アリーナおよびカーネルスタック配列の添字
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 仮想端末の添字 (0..NUM_TERMINALS)
pub type TerminalId = usize;
