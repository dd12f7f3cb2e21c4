//! 致命的なエラーの扱い.
//!
//! プロバイダ自体はエラーを`Result`として返すだけで、プロセスを終了させることはない.
//! ヒープを拡張できない実行時システムは処理を継続できないので、
//! 通常は、最上位で[`FatalHandler`]を使ってプロセスを終了させることになる.
//!
//! [`FatalHandler`]: ./trait.FatalHandler.html
use slog::{Discard, Logger};
use std::process;

use crate::Error;

/// 致命的なエラーを受け取って、プロセスを終了させるためのトレイト.
pub trait FatalHandler {
    /// エラー内容を報告した上で、処理を終了する.
    ///
    /// このメソッドから制御が戻ることはない.
    fn barf(&self, error: &Error) -> !;
}

/// ログを出力した後に`std::process::abort()`を呼び出す`FatalHandler`の実装.
#[derive(Debug, Clone)]
pub struct AbortHandler {
    logger: Logger,
}
impl AbortHandler {
    /// 新しい`AbortHandler`インスタンスを生成する.
    pub fn new(logger: Logger) -> Self {
        AbortHandler { logger }
    }
}
impl Default for AbortHandler {
    fn default() -> Self {
        Self::new(Logger::root(Discard, o!()))
    }
}
impl FatalHandler for AbortHandler {
    fn barf(&self, error: &Error) -> ! {
        crit!(self.logger, "Cannot allocate megablocks: {}", error;
              "kind" => ?error.kind());
        eprintln!("mblock: fatal error: {}", error);
        process::abort()
    }
}

/// `result`がエラーなら`handler`に処理を委譲し、そうでなければ値を取り出す.
pub fn unwrap_or_barf<T, H>(result: Result<T, Error>, handler: &H) -> T
where
    H: FatalHandler + ?Sized,
{
    match result {
        Ok(v) => v,
        Err(e) => handler.barf(&e),
    }
}
