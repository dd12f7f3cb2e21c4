//! メガブロックプロバイダ.
//!
//! プロバイダは[`VirtualMemory`]を使ってOSから仮想メモリを取得し、
//! メガブロック境界に揃えられた領域を上位のブロックアロケータに提供する.
//!
//! 以下の二つの実装がある:
//!
//! - [`BumpProvider`]: ヒープの基底アドレスから単調に進むカーソルの位置に、要求毎にマッピングを作成する
//! - [`ReserveCommitProvider`]: 最初の要求時に大きな範囲を予約しておき、その中でカーソルを進めながらコミットする
//!
//! どちらの実装も領域の解放は行わない.
//! また、内部で排他制御は行わないので、呼び出し側で直列化する必要がある
//! (`allocate`は`&mut self`を要求する).
//!
//! [`VirtualMemory`]: ../vm/trait.VirtualMemory.html
//! [`BumpProvider`]: ./struct.BumpProvider.html
//! [`ReserveCommitProvider`]: ./struct.ReserveCommitProvider.html
pub use self::builder::{PlatformProvider, ProviderBuilder};
pub use self::bump::BumpProvider;
pub use self::pool::ReservedPool;
pub use self::reserve_commit::{PoolState, ReserveCommitProvider};

use crate::megablock::{Address, MegablockSize};
use crate::metrics::ProviderMetrics;
use crate::{ErrorKind, Result};

mod builder;
mod bump;
mod pool;
mod reserve_commit;

/// メガブロックプロバイダを表すトレイト.
pub trait MegablockProvider {
    /// `n`個分の連続したメガブロックを割り当てる.
    ///
    /// 返されるアドレスは、常にメガブロック境界に揃っている.
    ///
    /// # Errors
    ///
    /// `n`が`0`の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される.
    /// それ以外のエラーの種類は実装に依存する.
    ///
    /// いずれのエラーも、呼び出し元が再試行して回復することは想定されていない.
    fn allocate(&mut self, n: usize) -> Result<Address>;

    /// 一つのメガブロックを割り当てる.
    ///
    /// `self.allocate(1)`と等しい.
    fn allocate_one(&mut self) -> Result<Address> {
        self.allocate(1)
    }

    /// `address`がこのプロバイダの管理するヒープ内を指しているかどうかを判定する.
    ///
    /// ヒープの範囲という概念を持たないプロバイダでは、常に`false`が返される.
    fn is_heap_address(&self, address: Address) -> bool {
        let _ = address;
        false
    }

    /// メガブロックのサイズを返す.
    fn megablock_size(&self) -> MegablockSize;

    /// プロバイダのメトリクスを返す.
    fn metrics(&self) -> &ProviderMetrics;

    /// これまでに割り当てられたメガブロック数の合計を返す.
    ///
    /// 同じ`AllocationCounter`を共有する全てのプロバイダでの割り当てが含まれる.
    fn total_allocated(&self) -> u64 {
        self.metrics().total_allocated()
    }
}
impl<'a, P: MegablockProvider + ?Sized> MegablockProvider for &'a mut P {
    fn allocate(&mut self, n: usize) -> Result<Address> {
        (**self).allocate(n)
    }
    fn is_heap_address(&self, address: Address) -> bool {
        (**self).is_heap_address(address)
    }
    fn megablock_size(&self) -> MegablockSize {
        (**self).megablock_size()
    }
    fn metrics(&self) -> &ProviderMetrics {
        (**self).metrics()
    }
}

/// 次に割り当てるアドレスを指すカーソル.
///
/// 値は単調に増加し、戻ることはない.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor(Address);
impl Cursor {
    fn position(self) -> Address {
        self.0
    }

    /// `size`だけ進めた後のカーソルを返す.
    fn advanced(self, size: usize) -> Result<Cursor> {
        let next = track_assert_some!(
            self.0.checked_add(size),
            ErrorKind::OutOfMemory,
            "Address space overflow: cursor={}, size={}",
            self.0,
            size
        );
        Ok(Cursor(next))
    }
}

/// OSから返されたアドレスがメガブロック境界に揃っていることを確認する.
///
/// どちらのプロバイダも、このチェックを通過したアドレスのみを返す.
fn verify_alignment(
    megablock_size: MegablockSize,
    address: Address,
    n: usize,
    expected: Address,
) -> Result<()> {
    track_assert!(
        megablock_size.is_aligned(address.as_usize()),
        ErrorKind::Misaligned,
        "Misaligned block {} returned when allocating {} megablock(s) at {}",
        address,
        n,
        expected
    );
    Ok(())
}

/// エラーの場合には、その種類毎の失敗回数をカウントする.
fn count_failure<T>(metrics: &ProviderMetrics, result: Result<T>) -> Result<T> {
    if let Err(ref e) = result {
        metrics.failures.increment(*e.kind());
    }
    result
}
