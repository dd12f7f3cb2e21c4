use std::collections::BTreeMap;

use crate::megablock::Address;
use crate::vm::VirtualMemory;
use crate::{ErrorKind, Result};

/// アドレス空間をプロセス内で模倣する`VirtualMemory`の実装.
///
/// 実際のメモリは一切確保せず、どの範囲がマッピング・予約・コミット済みかだけを管理する.
/// そのため、返されたアドレスを参照してはならない.
///
/// # 注意
///
/// これは主にテストや性能計測用途を意図した実装である.
/// OSの振る舞い(ヒントの無視、資源の枯渇、予約位置等)を自由に設定できる.
#[derive(Debug, Clone)]
pub struct SimulatedVm {
    regions: BTreeMap<usize, Region>,
    reservation_base: Address,
    honor_hints: bool,
    fallback: Address,
    address_limit: usize,
    commit_limit: Option<usize>,
    committed_bytes: usize,
    commit_shift: usize,
    injected_failure: Option<ErrorKind>,
}
impl SimulatedVm {
    /// 予約領域が配置されるデフォルトの位置.
    pub const DEFAULT_RESERVATION_BASE: usize = 0x1000_0000;

    /// 新しい`SimulatedVm`インスタンスを生成する.
    ///
    /// デフォルトでは、マッピングは常に`hint`の位置に配置され、
    /// 予約は`DEFAULT_RESERVATION_BASE`に配置される.
    pub fn new() -> Self {
        SimulatedVm {
            regions: BTreeMap::new(),
            reservation_base: Address::new(Self::DEFAULT_RESERVATION_BASE),
            honor_hints: true,
            fallback: Address::new(0),
            address_limit: usize::max_value(),
            commit_limit: None,
            committed_bytes: 0,
            commit_shift: 0,
            injected_failure: None,
        }
    }

    /// 次の予約が配置される位置を設定する.
    pub fn reservation_base(&mut self, base: Address) -> &mut Self {
        self.reservation_base = base;
        self
    }

    /// マッピング時に`hint`を無視して、代わりに`fallback`から順に配置するようにする.
    pub fn ignore_hints(&mut self, fallback: Address) -> &mut Self {
        self.honor_hints = false;
        self.fallback = fallback;
        self
    }

    /// 利用可能なアドレス空間の終端を設定する.
    ///
    /// これを超える範囲のマッピングや予約は、資源枯渇として失敗する.
    pub fn address_limit(&mut self, limit: usize) -> &mut Self {
        self.address_limit = limit;
        self
    }

    /// コミット可能な総バイト数の上限を設定する.
    pub fn commit_limit(&mut self, limit: usize) -> &mut Self {
        self.commit_limit = Some(limit);
        self
    }

    /// `commit`が、コミットした範囲の先頭ではなく、`offset`バイトずれたアドレスを返すようにする.
    ///
    /// 想定外のアドレスを返すOSを模倣するために使う.
    pub fn shift_commits(&mut self, offset: usize) -> &mut Self {
        self.commit_shift = offset;
        self
    }

    /// 次の一回の操作を、指定された種類のエラーで失敗させる.
    pub fn fail_next(&mut self, kind: ErrorKind) -> &mut Self {
        self.injected_failure = Some(kind);
        self
    }

    /// コミット(ないしマッピング)済みの総バイト数を返す.
    pub fn committed_bytes(&self) -> usize {
        self.committed_bytes
    }

    /// 予約ないしマッピングされている領域の数を返す.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// `address`を含む領域がコミット済みかどうかを判定する.
    pub fn is_committed(&self, address: Address) -> bool {
        self.find_region(address.as_usize())
            .map_or(false, |(_, r)| r.is_committed(address.as_usize()))
    }

    fn take_injected_failure(&mut self) -> Result<()> {
        if let Some(kind) = self.injected_failure.take() {
            track_panic!(kind, "Injected failure");
        }
        Ok(())
    }

    fn find_region(&self, address: usize) -> Option<(usize, &Region)> {
        self.regions
            .range(..=address)
            .next_back()
            .filter(|(_, r)| address < r.end)
            .map(|(&start, r)| (start, r))
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        let preceding = self.regions.range(..end).next_back();
        preceding.map_or(false, |(_, r)| start < r.end)
    }

    fn check_limits(&self, start: usize, size: usize) -> Result<usize> {
        let end = track_assert_some!(
            start.checked_add(size),
            ErrorKind::OutOfMemory,
            "Address space overflow: start={:#x}, size={}",
            start,
            size
        );
        track_assert!(
            end <= self.address_limit,
            ErrorKind::OutOfMemory,
            "Address space exhausted: end={:#x}, limit={:#x}",
            end,
            self.address_limit
        );
        Ok(end)
    }

    fn charge(&mut self, size: usize) -> Result<()> {
        if let Some(limit) = self.commit_limit {
            track_assert!(
                self.committed_bytes + size <= limit,
                ErrorKind::OutOfMemory,
                "Commit limit exceeded: committed={}, requested={}, limit={}",
                self.committed_bytes,
                size,
                limit
            );
        }
        self.committed_bytes += size;
        Ok(())
    }
}
impl Default for SimulatedVm {
    fn default() -> Self {
        Self::new()
    }
}
impl VirtualMemory for SimulatedVm {
    fn map(&mut self, hint: Address, size: usize) -> Result<Address> {
        track!(self.take_injected_failure())?;
        let start = if self.honor_hints {
            hint.as_usize()
        } else {
            self.fallback.as_usize()
        };
        let end = track!(self.check_limits(start, size))?;
        track_assert!(
            !self.overlaps(start, end),
            ErrorKind::MapFailed,
            "Range already in use: start={:#x}, size={}",
            start,
            size
        );
        track!(self.charge(size))?;

        if !self.honor_hints {
            self.fallback = Address::new(end);
        }
        self.regions.insert(start, Region::mapped(start, end));
        Ok(Address::new(start))
    }

    fn reserve(&mut self, size: usize) -> Result<Address> {
        if let Some(kind) = self.injected_failure.take() {
            track_panic!(
                ErrorKind::ReservationFailed,
                "Injected failure: {:?}",
                kind
            );
        }
        let start = self.reservation_base.as_usize();
        let end = match self.check_limits(start, size) {
            Ok(end) => end,
            Err(e) => track_panic!(ErrorKind::ReservationFailed, "{}", e),
        };
        track_assert!(
            !self.overlaps(start, end),
            ErrorKind::ReservationFailed,
            "Range already in use: start={:#x}, size={}",
            start,
            size
        );
        self.regions.insert(start, Region::reserved(end));
        self.reservation_base = Address::new(end);
        Ok(Address::new(start))
    }

    fn commit(&mut self, address: Address, size: usize) -> Result<Address> {
        track!(self.take_injected_failure())?;
        let start = address.as_usize();
        let end = track!(self.check_limits(start, size))?;
        let region_start = match self.find_region(start) {
            Some((region_start, region)) if end <= region.end => region_start,
            _ => track_panic!(
                ErrorKind::CommitFailed,
                "Not a reserved range: start={:#x}, size={}",
                start,
                size
            ),
        };

        let newly_committed = self.regions[&region_start].uncommitted_bytes(start, end);
        track!(self.charge(newly_committed))?;
        if let Some(region) = self.regions.get_mut(&region_start) {
            region.commit(start, end);
        }
        Ok(Address::new(start.wrapping_add(self.commit_shift)))
    }

    fn release(&mut self, address: Address, size: usize) -> Result<()> {
        let start = address.as_usize();
        let region = track_assert_some!(
            self.regions.remove(&start),
            ErrorKind::InvalidInput,
            "Not a mapped range: start={:#x}, size={}",
            start,
            size
        );
        let committed: usize = region.committed.iter().map(|(&s, &e)| e - s).sum();
        self.committed_bytes -= committed;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Region {
    end: usize,
    // コミット済みの部分範囲 (開始位置 => 終端位置)
    committed: BTreeMap<usize, usize>,
}
impl Region {
    fn mapped(start: usize, end: usize) -> Self {
        let mut committed = BTreeMap::new();
        committed.insert(start, end);
        Region { end, committed }
    }

    fn reserved(end: usize) -> Self {
        Region {
            end,
            committed: BTreeMap::new(),
        }
    }

    fn is_committed(&self, address: usize) -> bool {
        self.committed
            .range(..=address)
            .next_back()
            .map_or(false, |(_, &end)| address < end)
    }

    fn uncommitted_bytes(&self, start: usize, end: usize) -> usize {
        let overlapped: usize = self
            .committed
            .iter()
            .map(|(&s, &e)| {
                let s = s.max(start);
                let e = e.min(end);
                e.saturating_sub(s)
            })
            .sum();
        (end - start) - overlapped
    }

    fn commit(&mut self, start: usize, end: usize) {
        // 重複や隣接する範囲は一つにまとめる
        let mut new_start = start;
        let mut new_end = end;
        let merged = self
            .committed
            .range(..=end)
            .filter(|&(_, &e)| start <= e)
            .map(|(&s, &e)| (s, e))
            .collect::<Vec<_>>();
        for (s, e) in merged {
            new_start = new_start.min(s);
            new_end = new_end.max(e);
            self.committed.remove(&s);
        }
        self.committed.insert(new_start, new_end);
    }
}
