//! メガブロック(OSから取得するメモリの単位)関連の構成要素.
use crate::{ErrorKind, Result};

pub use self::address::Address;

mod address;

/// メガブロックのサイズを表現するための構造体.
///
/// "メガブロック"は、このcrateがOSから取得する仮想メモリの単位であり、
/// 返されるアドレスは、常に`MegablockSize`によって指定された境界にアライメントされている.
///
/// サイズは2の冪である必要があり、アライメント用のマスクはサイズから導出される.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MegablockSize(usize);
impl MegablockSize {
    /// 許容されるメガブロックサイズの最小値 (一般的なページサイズ).
    pub const MIN: usize = 4096;

    /// `MegablockSize::default()`で使われる値 (1MiB).
    pub const DEFAULT: usize = 1 << 20;

    /// 指定された値のメガブロックサイズを表現する`MegablockSize`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `size`が`MegablockSize::MIN`未満
    /// - `size`が2の冪ではない
    ///
    /// # Examples
    ///
    /// ```
    /// use mblock::ErrorKind;
    /// use mblock::megablock::MegablockSize;
    ///
    /// assert_eq!(MegablockSize::new(1 << 20).ok().map(|s| s.as_usize()), Some(1 << 20));
    ///
    /// assert_eq!(MegablockSize::new(1024).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// assert_eq!(MegablockSize::new(3 << 20).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: usize) -> Result<Self> {
        track_assert!(size >= Self::MIN, ErrorKind::InvalidInput; size);
        track_assert!(size.is_power_of_two(), ErrorKind::InvalidInput; size);
        Ok(MegablockSize(size))
    }

    /// サイズをバイト単位で返す.
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// アドレスのうち、メガブロック内オフセットを表す部分のマスクを返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use mblock::megablock::MegablockSize;
    ///
    /// assert_eq!(MegablockSize::default().mask(), 0xF_FFFF);
    /// ```
    pub fn mask(self) -> usize {
        self.0 - 1
    }

    /// `n`個のメガブロックに相当するバイト数を返す.
    ///
    /// `n`が`0`の場合、あるいは結果が`usize`に収まらない場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn bytes_for(self, n: usize) -> Result<usize> {
        track_assert_ne!(n, 0, ErrorKind::InvalidInput);
        let size = track_assert_some!(
            n.checked_mul(self.0),
            ErrorKind::InvalidInput,
            "Too many megablocks: {}",
            n
        );
        Ok(size)
    }

    /// 指定位置より後方の最初のメガブロック境界を返す.
    ///
    /// 結果が`usize`に収まらない場合には`None`が返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use mblock::megablock::MegablockSize;
    ///
    /// let size = MegablockSize::default();
    /// assert_eq!(size.ceil_align(0), Some(0));
    /// assert_eq!(size.ceil_align(0x1000_0010), Some(0x1010_0000));
    /// assert_eq!(size.ceil_align(0x1010_0000), Some(0x1010_0000));
    /// assert_eq!(size.ceil_align(usize::max_value()), None);
    /// ```
    pub fn ceil_align(self, position: usize) -> Option<usize> {
        position
            .checked_add(self.mask())
            .map(|p| p & !self.mask())
    }

    /// 指定位置より前方の最初のメガブロック境界を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use mblock::megablock::MegablockSize;
    ///
    /// let size = MegablockSize::default();
    /// assert_eq!(size.floor_align(0x2000_0010), 0x2000_0000);
    /// assert_eq!(size.floor_align(0x2000_0000), 0x2000_0000);
    /// ```
    pub fn floor_align(self, position: usize) -> usize {
        position & !self.mask()
    }

    /// 指定位置がメガブロック境界に沿っているかどうかを判定する.
    ///
    /// # Examples
    ///
    /// ```
    /// use mblock::megablock::MegablockSize;
    ///
    /// let size = MegablockSize::default();
    /// assert!(size.is_aligned(0x5000_0000));
    /// assert!(size.is_aligned(0x5020_0000));
    ///
    /// assert!(!size.is_aligned(0x5000_1000));
    /// ```
    pub fn is_aligned(self, position: usize) -> bool {
        position & self.mask() == 0
    }
}
impl Default for MegablockSize {
    fn default() -> Self {
        MegablockSize(Self::DEFAULT)
    }
}
