use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl Error {
    /// OSが返したエラーコードから`Error`を生成する.
    ///
    /// 資源枯渇(e.g., `ENOMEM`)を示すコードは`ErrorKind::OutOfMemory`に、
    /// それ以外は`otherwise`で指定された種類に分類される.
    pub(crate) fn from_os_error(e: std::io::Error, otherwise: ErrorKind) -> Self {
        if is_out_of_memory(&e) {
            ErrorKind::OutOfMemory.cause(e).into()
        } else {
            otherwise.cause(e).into()
        }
    }
}
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else {
            Error::from_os_error(e, ErrorKind::MapFailed)
        }
    }
}

#[cfg(unix)]
fn is_out_of_memory(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENOMEM)
}

#[cfg(windows)]
fn is_out_of_memory(e: &std::io::Error) -> bool {
    use windows_sys::Win32::Foundation::{
        ERROR_COMMITMENT_LIMIT, ERROR_NOT_ENOUGH_MEMORY, ERROR_OUTOFMEMORY,
    };
    match e.raw_os_error() {
        Some(code) => [
            ERROR_NOT_ENOUGH_MEMORY,
            ERROR_OUTOFMEMORY,
            ERROR_COMMITMENT_LIMIT,
        ]
        .iter()
        .any(|&c| c as i32 == code),
        None => false,
    }
}

#[cfg(not(any(unix, windows)))]
fn is_out_of_memory(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::OutOfMemory
}

/// 発生し得るエラーの種別.
///
/// このcrateのエラーは、いずれも呼び出し元で回復できることを想定していない.
/// 実行時システムは、通常は[`FatalHandler`]を通してプロセスを終了させる.
///
/// [`FatalHandler`]: ./fatal/trait.FatalHandler.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// OSのメモリ資源(物理メモリないしアドレス空間)が枯渇している.
    OutOfMemory,

    /// 資源枯渇以外の理由で、OSがマッピングを拒否した.
    MapFailed,

    /// 資源枯渇以外の理由で、OSがコミットを拒否した.
    CommitFailed,

    /// OSから返されたアドレスがメガブロック境界に揃っていない.
    ///
    /// 内部不変条件の違反であり、プログラムないしプラットフォーム設定に問題があることを示している.
    Misaligned,

    /// 初回のアドレス空間予約に失敗した.
    ReservationFailed,

    /// 予約領域が小さすぎて、境界を揃えた後に最初の要求を収めることができない.
    ///
    /// 一時的な状態ではなく、ヒープサイズ設定の誤りを示している.
    ReservationTooSmall,

    /// 予約領域を使い切った (設定された最大ヒープサイズに到達した).
    HeapExhausted,

    /// 入力が不正.
    ///
    /// E.g., 要求メガブロック数が`0`、メガブロックサイズが2の冪ではない
    InvalidInput,
}
impl trackable::error::ErrorKind for ErrorKind {}
impl ErrorKind {
    /// メトリクスのラベル等に使われる名前を返す.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::MapFailed => "map_failed",
            ErrorKind::CommitFailed => "commit_failed",
            ErrorKind::Misaligned => "misaligned",
            ErrorKind::ReservationFailed => "reservation_failed",
            ErrorKind::ReservationTooSmall => "reservation_too_small",
            ErrorKind::HeapExhausted => "heap_exhausted",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn enomem_is_classified_as_out_of_memory() {
        let e = std::io::Error::from_raw_os_error(libc::ENOMEM);
        let error = Error::from_os_error(e, ErrorKind::CommitFailed);
        assert_eq!(*error.kind(), ErrorKind::OutOfMemory);

        let e = std::io::Error::from_raw_os_error(libc::EACCES);
        let error = Error::from_os_error(e, ErrorKind::CommitFailed);
        assert_eq!(*error.kind(), ErrorKind::CommitFailed);

        let e = std::io::Error::from_raw_os_error(libc::EEXIST);
        assert_eq!(*Error::from(e).kind(), ErrorKind::MapFailed);
    }
}
