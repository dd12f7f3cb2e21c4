//! Megablock Provider.
//!
//! `mblock`は、GC付きの実行時システムのヒープの最下層で、OSから仮想メモリを取得するためのcrate.
//!
//! # 特徴
//!
//! - 固定サイズ(デフォルトは1MiB)の"メガブロック"単位で、OSから直接メモリを取得する
//!   - 返されるアドレスは、常にメガブロック境界にアライメントされている
//!   - メガブロックをより小さなブロックに分割して管理するのは、上位のブロックアロケータの責務
//! - 二種類のOS APIに対応している:
//!   - 匿名マッピング(`mmap`)によるカーソル方式: [BumpProvider]
//!   - アドレス空間の予約とコミット(`VirtualAlloc`)の二段階方式: [ReserveCommitProvider]
//! - ヒープは単調に拡大するのみで、OSへのメモリの返却は行わない
//! - スレッドセーフではない (呼び出し側で直列化する必要がある)
//! - エラーは全て`Result`として返され、プロセスを終了させるかどうかは利用者([fatal])が決める
//!
//! # モジュールの依存関係
//!
//! ```text
//! provider => vm
//!          => megablock
//!          => metrics
//! ```
//!
//! - [provider]モジュール:
//!   - [MegablockProvider]トレイトとその実装群を提供
//!   - `mblock`の利用者が直接触るのは、主にこのモジュール
//!   - アライメントの検証とカーソルの管理は、全てこの層で行う
//! - [vm]モジュール:
//!   - OSの仮想メモリ操作を抽象化した[VirtualMemory]トレイトとその実装群を提供
//!   - テスト用に、アドレス空間を模倣する[SimulatedVm]も用意されている
//!
//! # Examples
//!
//! ```
//! # extern crate mblock;
//! use mblock::megablock::Address;
//! use mblock::provider::{MegablockProvider, ProviderBuilder};
//! use mblock::vm::SimulatedVm;
//!
//! # fn main() -> Result<(), mblock::Error> {
//! let mut provider = ProviderBuilder::new()
//!     .heap_base(Address::new(0x5000_0000))
//!     .bump(SimulatedVm::new())?;
//!
//! assert_eq!(provider.allocate(2)?, Address::new(0x5000_0000));
//! assert_eq!(provider.allocate(1)?, Address::new(0x5020_0000));
//! assert_eq!(provider.total_allocated(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! [provider]: ./provider/index.html
//! [vm]: ./vm/index.html
//! [fatal]: ./fatal/index.html
//! [MegablockProvider]: ./provider/trait.MegablockProvider.html
//! [BumpProvider]: ./provider/struct.BumpProvider.html
//! [ReserveCommitProvider]: ./provider/struct.ReserveCommitProvider.html
//! [VirtualMemory]: ./vm/trait.VirtualMemory.html
//! [SimulatedVm]: ./vm/struct.SimulatedVm.html
#![warn(missing_docs)]
#[cfg(unix)]
extern crate libc;
extern crate prometrics;
#[macro_use]
extern crate trackable;
#[macro_use]
extern crate slog;
#[cfg(windows)]
extern crate windows_sys;

pub use crate::error::{Error, ErrorKind};

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub mod fatal;
pub mod megablock;
pub mod metrics;
pub mod provider;
pub mod vm;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
