//! 仮想メモリ操作のインタフェース定義と実装群.
//!
//! このモジュールは[provider](../provider/index.html)がOSから仮想メモリを取得する際に使用する
//! 最下層の操作(マッピング、予約、コミット)を提供する.
//!
//! どのOSのAPIもメガブロック境界へのアライメントを直接要求する手段を持たないので、
//! ここでの実装はアライメントを一切保証しない.
//! アライメントの保証は上位の[provider](../provider/index.html)層が一括して担当する.
#[cfg(unix)]
pub use self::mmap::{MmapVm, Placement};
pub use self::simulated::SimulatedVm;
#[cfg(windows)]
pub use self::windows::WindowsVm;

use crate::megablock::Address;
use crate::Result;

#[cfg(unix)]
mod mmap;
mod simulated;
#[cfg(windows)]
mod windows;

/// ビルド対象のOSで使用される`VirtualMemory`の実装.
#[cfg(unix)]
pub type PlatformVm = MmapVm;

/// ビルド対象のOSで使用される`VirtualMemory`の実装.
#[cfg(windows)]
pub type PlatformVm = WindowsVm;

/// OSの仮想メモリ操作を表すトレイト.
///
/// 全ての操作は同期的で、部分的な成功は存在しない.
/// 利用者に返したメガブロックがOSに返却されることはない.
/// `release`は、割り当ての途中で失敗した際に、作成したばかりのマッピングを取り消すためだけに使われる.
pub trait VirtualMemory {
    /// 読み書き可能な匿名のプライベートマッピングを作成する.
    ///
    /// `hint`は配置先の候補アドレスである.
    /// 実装によっては`hint`が無視され、別の位置に配置されることもある.
    ///
    /// # Errors
    ///
    /// - 資源が枯渇している場合には`ErrorKind::OutOfMemory`
    /// - それ以外の理由でマッピングが拒否された場合には`ErrorKind::MapFailed`
    fn map(&mut self, hint: Address, size: usize) -> Result<Address>;

    /// 物理メモリを割り当てずに、アドレス空間の予約のみを行う.
    ///
    /// # Errors
    ///
    /// 予約に失敗した場合には`ErrorKind::ReservationFailed`のエラーが返される.
    fn reserve(&mut self, size: usize) -> Result<Address>;

    /// 予約済みの範囲`[address, address + size)`に物理メモリを割り当てる.
    ///
    /// 成功した場合には、コミットされた領域の先頭アドレスが返される.
    ///
    /// # Errors
    ///
    /// - 資源が枯渇している場合には`ErrorKind::OutOfMemory`
    /// - それ以外の理由でコミットが拒否された場合には`ErrorKind::CommitFailed`
    fn commit(&mut self, address: Address, size: usize) -> Result<Address>;

    /// `map`で作成した範囲`[address, address + size)`を解放する.
    fn release(&mut self, address: Address, size: usize) -> Result<()>;
}
impl<'a, V: VirtualMemory + ?Sized> VirtualMemory for &'a mut V {
    fn map(&mut self, hint: Address, size: usize) -> Result<Address> {
        (**self).map(hint, size)
    }
    fn reserve(&mut self, size: usize) -> Result<Address> {
        (**self).reserve(size)
    }
    fn commit(&mut self, address: Address, size: usize) -> Result<Address> {
        (**self).commit(address, size)
    }
    fn release(&mut self, address: Address, size: usize) -> Result<()> {
        (**self).release(address, size)
    }
}
