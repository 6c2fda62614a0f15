// src/kernel/core/result.rs
//! カーネル共通エラーハンドリング
//!
//! コンテキスト情報付きエラーで、デバッグを容易にします。
//! システムコール境界では ABI の数値 (-1 / 1 / 256) に変換されます。

use core::fmt;

/// カーネル Result 型
pub type KernelResult<T> = Result<T, KernelError>;

/// カーネルエラー（コンテキスト情報付き）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl KernelError {
    /// 新しいエラーを作成
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    /// コンテキスト情報付きエラーを作成
    #[inline]
    pub const fn with_context(kind: ErrorKind, ctx: &'static str) -> Self {
        Self {
            kind,
            context: Some(ctx),
        }
    }

    /// エラー種類を取得
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// コンテキストを取得
    #[inline]
    pub const fn context(&self) -> Option<&'static str> {
        self.context
    }
}

/// エラー種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// デバイスエラー
    Device(DeviceError),
    /// ファイルシステムエラー
    Fs(FsError),
    /// プロセス管理エラー
    Process(ProcessError),
    /// 不正な引数
    InvalidArgument,
}

/// デバイスエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// 初期化失敗
    InitFailed,
    /// ハードウェアが応答しない
    Timeout,
    /// 不正なレート・周波数
    BadRate,
}

/// ファイルシステムエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// ファイルが見つからない
    NotFound,
    /// ブートブロックが壊れている
    Malformed,
    /// 実行可能ファイルではない
    NotExecutable,
    /// 読み取り専用ファイルシステム
    ReadOnly,
}

/// プロセス管理エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// タスクテーブルが満杯
    TooManyTasks,
    /// PID が使用中でない・範囲外
    NoSuchPid,
    /// ディスクリプタテーブルが満杯・不正
    BadDescriptor,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Device(e) => write!(f, "Device error: {:?}", e)?,
            ErrorKind::Fs(e) => write!(f, "Filesystem error: {:?}", e)?,
            ErrorKind::Process(e) => write!(f, "Process error: {:?}", e)?,
            ErrorKind::InvalidArgument => write!(f, "Invalid argument")?,
        }

        if let Some(ctx) = self.context {
            write!(f, " (context: {})", ctx)?;
        }

        Ok(())
    }
}

impl From<DeviceError> for KernelError {
    #[inline]
    fn from(e: DeviceError) -> Self {
        KernelError::new(ErrorKind::Device(e))
    }
}

impl From<FsError> for KernelError {
    #[inline]
    fn from(e: FsError) -> Self {
        KernelError::new(ErrorKind::Fs(e))
    }
}

impl From<ProcessError> for KernelError {
    #[inline]
    fn from(e: ProcessError) -> Self {
        KernelError::new(ErrorKind::Process(e))
    }
}
