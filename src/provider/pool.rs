use crate::megablock::{Address, MegablockSize};
use crate::{ErrorKind, Result};

/// OSから予約したアドレス空間.
///
/// OSが返す予約領域の先頭は、メガブロック境界に揃っているとは限らない.
/// そのため、先頭を次のメガブロック境界まで切り上げた位置から、
/// 終端を前のメガブロック境界まで切り下げた位置までを、利用可能な範囲としている.
/// (先頭側の端数は使われないままとなる)
///
/// ```text
/// raw_base     usable_base                      usable_end  raw_end
///    |-slop-|----------- megablocks -----------|-slop-|
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedPool {
    raw_base: Address,
    raw_size: usize,
    usable_base: Address,
    usable_end: Address,
}
impl ReservedPool {
    /// 最大ヒープサイズが指定されていない場合の予約サイズ (256MiB).
    pub const DEFAULT_SIZE: usize = 256 * 1024 * 1024;

    /// 予約すべきサイズを求める.
    ///
    /// `max_heap_size`が指定されていない(ないし`0`の)場合には`DEFAULT_SIZE`が使われる.
    /// 指定されている場合でも、境界を揃えた領域を最低一つは確保できるように、
    /// メガブロック二つ分が下限となる.
    pub fn size_for(max_heap_size: Option<u64>, megablock_size: MegablockSize) -> Result<usize> {
        let floor = megablock_size.as_usize() * 2;
        match max_heap_size {
            None | Some(0) => Ok(Self::DEFAULT_SIZE.max(floor)),
            Some(limit) => {
                track_assert!(
                    limit <= usize::max_value() as u64,
                    ErrorKind::InvalidInput,
                    "Too large heap size: {}",
                    limit
                );
                Ok((limit as usize).max(floor))
            }
        }
    }

    pub(crate) fn new(
        raw_base: Address,
        raw_size: usize,
        megablock_size: MegablockSize,
    ) -> Result<Self> {
        let raw_end = track_assert_some!(
            raw_base.checked_add(raw_size),
            ErrorKind::ReservationFailed,
            "Reservation wraps around the address space: base={}, size={}",
            raw_base,
            raw_size
        );
        let usable_base = track_assert_some!(
            megablock_size.ceil_align(raw_base.as_usize()),
            ErrorKind::ReservationTooSmall,
            "No aligned address in the reservation: base={}, size={}",
            raw_base,
            raw_size
        );
        let usable_end = megablock_size.floor_align(raw_end.as_usize()).max(usable_base);
        Ok(ReservedPool {
            raw_base,
            raw_size,
            usable_base: Address::new(usable_base),
            usable_end: Address::new(usable_end),
        })
    }

    /// OSから返された予約領域の先頭アドレス.
    pub fn raw_base(&self) -> Address {
        self.raw_base
    }

    /// 予約したバイト数.
    pub fn raw_size(&self) -> usize {
        self.raw_size
    }

    /// 予約領域の終端アドレス.
    pub fn raw_end(&self) -> Address {
        Address::new(self.raw_base.as_usize() + self.raw_size)
    }

    /// メガブロック境界に揃えられた、利用可能な範囲の先頭アドレス.
    pub fn usable_base(&self) -> Address {
        self.usable_base
    }

    /// 利用可能な範囲の終端アドレス (この位置自体は範囲に含まれない).
    pub fn usable_end(&self) -> Address {
        self.usable_end
    }

    /// 利用可能な範囲のバイト数.
    pub fn usable_size(&self) -> usize {
        self.usable_end.as_usize() - self.usable_base.as_usize()
    }

    /// `address`が`[usable_base, usable_end)`の範囲内にあるかどうかを判定する.
    pub fn contains(&self, address: Address) -> bool {
        self.usable_base <= address && address < self.usable_end
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn unaligned_base_is_rounded_up() -> TestResult {
        let pool = track!(ReservedPool::new(
            Address::new(0x1000_0010),
            ReservedPool::DEFAULT_SIZE,
            MegablockSize::default()
        ))?;
        assert_eq!(pool.usable_base(), Address::new(0x1010_0000));
        assert_eq!(pool.usable_end(), Address::new(0x2000_0000));
        assert_eq!(pool.raw_end(), Address::new(0x2000_0010));
        assert_eq!(pool.usable_size(), 255 << 20);

        assert!(pool.contains(Address::new(0x1010_0000)));
        assert!(pool.contains(Address::new(0x1FFF_FFFF)));
        assert!(!pool.contains(Address::new(0x2000_0000)));
        assert!(!pool.contains(Address::new(0x1000_0010)));
        Ok(())
    }

    #[test]
    fn aligned_base_is_kept() -> TestResult {
        let pool = track!(ReservedPool::new(
            Address::new(0x1000_0000),
            4 << 20,
            MegablockSize::default()
        ))?;
        assert_eq!(pool.usable_base(), Address::new(0x1000_0000));
        assert_eq!(pool.usable_size(), 4 << 20);
        Ok(())
    }

    #[test]
    fn tiny_reservation_has_empty_usable_range() -> TestResult {
        let pool = track!(ReservedPool::new(
            Address::new(0x1000_0010),
            0x1000,
            MegablockSize::default()
        ))?;
        assert_eq!(pool.usable_size(), 0);
        assert!(!pool.contains(pool.usable_base()));
        Ok(())
    }

    #[test]
    fn size_for_works() -> TestResult {
        let size = MegablockSize::default();
        assert_eq!(track!(ReservedPool::size_for(None, size))?, 256 << 20);
        assert_eq!(track!(ReservedPool::size_for(Some(0), size))?, 256 << 20);
        assert_eq!(track!(ReservedPool::size_for(Some(64 << 20), size))?, 64 << 20);
        assert_eq!(track!(ReservedPool::size_for(Some(1 << 20), size))?, 2 << 20);
        assert_eq!(track!(ReservedPool::size_for(Some(100), size))?, 2 << 20);
        Ok(())
    }
}
