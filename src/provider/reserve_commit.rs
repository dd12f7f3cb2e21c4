use slog::Logger;

use super::{count_failure, verify_alignment, Cursor, MegablockProvider, ReservedPool};
use crate::megablock::{Address, MegablockSize};
use crate::metrics::ProviderMetrics;
use crate::vm::VirtualMemory;
use crate::{ErrorKind, Result};

/// `ReserveCommitProvider`の予約領域の状態.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// まだ予約が行われていない.
    Uninitialized,

    /// 予約済みで、領域内に割り当て可能な空きが(おそらく)ある.
    Reserved,

    /// 予約領域を使い切った.
    ///
    /// この状態に一度遷移すると、以後の全ての割り当て要求は失敗する.
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Uninitialized,
    Reserved {
        pool: ReservedPool,
        next_request: Cursor,
    },
    Exhausted {
        pool: ReservedPool,
    },
}

/// アドレス空間の予約とコミットの二段階で、メガブロックを割り当てるプロバイダ.
///
/// 最初の割り当て要求時に、大きな範囲(デフォルトでは256MiB、ないし最大ヒープサイズ)を予約する.
/// 予約しただけでは物理メモリは消費されない.
///
/// 予約領域の先頭はメガブロック境界に揃っているとは限らないので、
/// 次の境界まで切り上げた位置を起点とし、以後の要求に対しては、
/// カーソルを進めながら、その位置の範囲をコミットして返す.
///
/// 予約領域を使い切った場合には、追加の予約は行わずに`ErrorKind::HeapExhausted`のエラーを返す.
#[derive(Debug)]
pub struct ReserveCommitProvider<V> {
    vm: V,
    megablock_size: MegablockSize,
    reservation_size: usize,
    max_heap_size: Option<u64>,
    state: State,
    logger: Logger,
    metrics: ProviderMetrics,
}
impl<V: VirtualMemory> ReserveCommitProvider<V> {
    pub(crate) fn new(
        vm: V,
        megablock_size: MegablockSize,
        reservation_size: usize,
        max_heap_size: Option<u64>,
        logger: Logger,
        metrics: ProviderMetrics,
    ) -> Self {
        ReserveCommitProvider {
            vm,
            megablock_size,
            reservation_size,
            max_heap_size,
            state: State::Uninitialized,
            logger,
            metrics,
        }
    }

    /// 予約する(した)アドレス空間のバイト数.
    ///
    /// これがヒープサイズの上限となる.
    pub fn reservation_size(&self) -> usize {
        self.reservation_size
    }

    /// 予約領域の現在の状態を返す.
    pub fn state(&self) -> PoolState {
        match self.state {
            State::Uninitialized => PoolState::Uninitialized,
            State::Reserved { .. } => PoolState::Reserved,
            State::Exhausted { .. } => PoolState::Exhausted,
        }
    }

    /// 予約済みの領域を返す.
    ///
    /// まだ予約が行われていない場合には`None`が返される.
    pub fn pool(&self) -> Option<&ReservedPool> {
        match self.state {
            State::Uninitialized => None,
            State::Reserved { ref pool, .. } | State::Exhausted { ref pool } => Some(pool),
        }
    }

    /// 次の割り当て要求で使われるアドレスを返す.
    ///
    /// 予約が行われていない場合や、予約領域を使い切った場合には`None`が返される.
    pub fn next_request(&self) -> Option<Address> {
        match self.state {
            State::Reserved { next_request, .. } => Some(next_request.position()),
            _ => None,
        }
    }

    /// 予約領域内で、まだ割り当てられていないメガブロックの数を返す.
    ///
    /// 予約前は、予約サイズから見込まれる最小の値を返す.
    pub fn remaining_megablocks(&self) -> usize {
        let mb = self.megablock_size.as_usize();
        match self.state {
            State::Uninitialized => self.reservation_size / mb - 1,
            State::Reserved { pool, next_request } => {
                (pool.usable_end().as_usize() - next_request.position().as_usize()) / mb
            }
            State::Exhausted { .. } => 0,
        }
    }

    /// 内部で使用している`VirtualMemory`への参照を返す.
    pub fn vm(&self) -> &V {
        &self.vm
    }

    /// 内部で使用している`VirtualMemory`への可変参照を返す.
    pub fn vm_mut(&mut self) -> &mut V {
        &mut self.vm
    }

    /// エラーメッセージ用に、ヒープサイズの上限を文字列化する.
    ///
    /// 下限に切り上げられている場合には、設定された値も併記する.
    fn heap_limit(&self) -> String {
        match self.max_heap_size {
            Some(limit) if limit != 0 && limit != self.reservation_size as u64 => format!(
                "{} bytes, configured max_heap_size={} bytes",
                self.reservation_size, limit
            ),
            _ => format!("{} bytes", self.reservation_size),
        }
    }

    fn reserve(&mut self, first_request_size: usize) -> Result<()> {
        let raw_base = track!(self.vm.reserve(self.reservation_size))?;
        let pool = track!(ReservedPool::new(
            raw_base,
            self.reservation_size,
            self.megablock_size
        ))?;
        info!(
            self.logger,
            "Reserved {} bytes of address space at {}", self.reservation_size, raw_base;
            "usable_base" => %pool.usable_base(),
            "usable_end" => %pool.usable_end()
        );
        self.metrics.reserved_bytes.set(self.reservation_size as f64);
        self.state = State::Reserved {
            pool,
            next_request: Cursor(pool.usable_base()),
        };

        let fits = pool
            .usable_base()
            .checked_add(first_request_size)
            .map_or(false, |end| end <= pool.raw_end());
        track_assert!(
            fits,
            ErrorKind::ReservationTooSmall,
            "Reserved too small a region to start with: reserved={}, dropped={}, requested={}",
            self.reservation_size,
            pool.usable_base().as_usize() - raw_base.as_usize(),
            first_request_size
        );
        Ok(())
    }

    fn allocate_impl(&mut self, n: usize) -> Result<Address> {
        let size = track!(self.megablock_size.bytes_for(n))?;
        if let State::Uninitialized = self.state {
            track!(self.reserve(size))?;
        }

        let (pool, cursor) = match self.state {
            State::Reserved { pool, next_request } => (pool, next_request),
            _ => track_panic!(
                ErrorKind::HeapExhausted,
                "Exhausted max heap size ({})",
                self.heap_limit()
            ),
        };
        let next_request = match cursor.advanced(size) {
            Ok(next) if next.position() <= pool.usable_end() => next,
            _ => {
                self.state = State::Exhausted { pool };
                warn!(
                    self.logger,
                    "Exhausted max heap size ({})", self.heap_limit();
                    "requested" => n
                );
                track_panic!(
                    ErrorKind::HeapExhausted,
                    "Exhausted max heap size ({}): requested={} megablock(s), remaining={} bytes",
                    self.heap_limit(),
                    n,
                    pool.usable_end().as_usize() - cursor.position().as_usize()
                );
            }
        };

        let expected = cursor.position();
        let ret = track!(self.vm.commit(expected, size))?;
        track!(verify_alignment(self.megablock_size, ret, n, expected))?;
        debug!(self.logger, "Allocated {} megablock(s) at {}", n, ret);

        self.state = State::Reserved { pool, next_request };
        self.metrics.count_allocation(n);
        Ok(ret)
    }
}
impl<V: VirtualMemory> MegablockProvider for ReserveCommitProvider<V> {
    fn allocate(&mut self, n: usize) -> Result<Address> {
        let result = track!(self.allocate_impl(n));
        count_failure(&self.metrics, result)
    }

    /// 予約領域の利用可能な範囲`[usable_base, usable_end)`に`address`が含まれるかどうかを判定する.
    ///
    /// 予約前は常に`false`となる.
    fn is_heap_address(&self, address: Address) -> bool {
        self.pool().map_or(false, |pool| pool.contains(address))
    }

    fn megablock_size(&self) -> MegablockSize {
        self.megablock_size
    }

    fn metrics(&self) -> &ProviderMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::provider::ProviderBuilder;
    use crate::vm::SimulatedVm;

    fn unaligned_vm() -> SimulatedVm {
        let mut vm = SimulatedVm::new();
        vm.reservation_base(Address::new(0x1000_0010));
        vm
    }

    #[test]
    fn first_allocation_reserves_and_aligns() -> TestResult {
        let mut provider = track!(ProviderBuilder::new().reserve_commit(unaligned_vm()))?;
        assert_eq!(provider.state(), PoolState::Uninitialized);
        assert_eq!(provider.reservation_size(), 256 << 20);
        assert!(!provider.is_heap_address(Address::new(0x1010_0000)));
        assert!(!provider.is_heap_address(Address::new(0)));

        let a = track!(provider.allocate(4))?;
        assert_eq!(a, Address::new(0x1010_0000));
        assert_eq!(provider.total_allocated(), 4);
        assert_eq!(provider.state(), PoolState::Reserved);
        assert!(provider.vm().is_committed(a));
        assert_eq!(provider.vm().committed_bytes(), 4 << 20);
        assert_eq!(provider.metrics().reserved_bytes(), 256 << 20);

        let pool = provider.pool().cloned().expect("reserved");
        assert_eq!(pool.raw_base(), Address::new(0x1000_0010));
        assert_eq!(pool.usable_base(), Address::new(0x1010_0000));

        let b = track!(provider.allocate(1))?;
        assert_eq!(b, Address::new(0x1050_0000));
        assert_eq!(provider.total_allocated(), 5);
        assert_eq!(provider.remaining_megablocks(), 255 - 5);
        Ok(())
    }

    #[test]
    fn heap_membership_works() -> TestResult {
        let mut provider = track!(ProviderBuilder::new().reserve_commit(unaligned_vm()))?;
        let a = track!(provider.allocate(2))?;
        for offset in &[0, 1, 0x1000, (2 << 20) - 1] {
            assert!(provider.is_heap_address(Address::new(a.as_usize() + offset)));
        }

        let pool = provider.pool().cloned().expect("reserved");
        assert!(!provider.is_heap_address(Address::new(0x1000_0000)));
        assert!(!provider.is_heap_address(pool.raw_base()));
        assert!(!provider.is_heap_address(pool.usable_end()));
        assert!(!provider.is_heap_address(pool.raw_end()));
        assert!(!provider.is_heap_address(Address::new(0x5000_0000)));
        Ok(())
    }

    #[test]
    fn exhaustion_is_terminal() -> TestResult {
        let mut provider = track!(ProviderBuilder::new().reserve_commit(unaligned_vm()))?;
        track!(provider.allocate(4))?;
        track!(provider.allocate(250))?;
        assert_eq!(provider.remaining_megablocks(), 1);

        let e = provider.allocate(2).err().expect("must fail");
        assert_eq!(*e.kind(), ErrorKind::HeapExhausted);
        assert!(e.to_string().contains("268435456"), "{}", e);
        assert_eq!(provider.state(), PoolState::Exhausted);
        assert_eq!(provider.total_allocated(), 254);

        // 一つ分の空きは残っているが、もう割り当ては行われない
        let e = provider.allocate(1).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::HeapExhausted));
        assert_eq!(provider.remaining_megablocks(), 0);
        assert_eq!(provider.metrics().failures().get(ErrorKind::HeapExhausted), 2);

        // 予約済みの範囲は引き続きヒープとみなされる
        assert!(provider.is_heap_address(Address::new(0x1010_0000)));
        assert_eq!(provider.vm().region_count(), 1);
        Ok(())
    }

    #[test]
    fn max_heap_size_limits_the_reservation() -> TestResult {
        let mut provider = track!(ProviderBuilder::new()
            .max_heap_size(4 << 20)
            .reserve_commit(SimulatedVm::new()))?;
        assert_eq!(provider.reservation_size(), 4 << 20);

        assert_eq!(
            track!(provider.allocate(3))?,
            Address::new(SimulatedVm::DEFAULT_RESERVATION_BASE)
        );
        track!(provider.allocate(1))?;
        let e = provider.allocate(1).err().expect("must fail");
        assert_eq!(*e.kind(), ErrorKind::HeapExhausted);
        assert!(e.to_string().contains("4194304"), "{}", e);
        Ok(())
    }

    #[test]
    fn clamped_heap_size_is_reported() -> TestResult {
        let mut provider = track!(ProviderBuilder::new()
            .max_heap_size(100)
            .reserve_commit(SimulatedVm::new()))?;
        assert_eq!(provider.reservation_size(), 2 << 20);

        track!(provider.allocate(2))?;
        let e = provider.allocate(1).err().expect("must fail");
        assert_eq!(*e.kind(), ErrorKind::HeapExhausted);
        let message = e.to_string();
        assert!(message.contains("2097152 bytes"), "{}", message);
        assert!(message.contains("max_heap_size=100 bytes"), "{}", message);
        Ok(())
    }

    #[test]
    fn too_small_reservation_is_reported() -> TestResult {
        let mut provider = track!(ProviderBuilder::new()
            .max_heap_size(1 << 20)
            .reserve_commit(unaligned_vm()))?;
        assert_eq!(provider.reservation_size(), 2 << 20);

        let e = provider.allocate(2).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::ReservationTooSmall));
        assert_eq!(provider.state(), PoolState::Reserved);
        assert_eq!(provider.total_allocated(), 0);

        // 予約は済んでいるので、収まる要求なら受け付けられる
        let a = track!(provider.allocate(1))?;
        assert_eq!(a, Address::new(0x1010_0000));
        assert_eq!(provider.vm().region_count(), 1);
        Ok(())
    }

    #[test]
    fn reservation_failure_keeps_uninitialized() -> TestResult {
        let mut provider = track!(ProviderBuilder::new().reserve_commit(SimulatedVm::new()))?;
        provider.vm_mut().fail_next(ErrorKind::OutOfMemory);

        let e = provider.allocate(1).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::ReservationFailed));
        assert_eq!(provider.state(), PoolState::Uninitialized);
        assert!(provider.pool().is_none());
        assert!(!provider.is_heap_address(Address::new(SimulatedVm::DEFAULT_RESERVATION_BASE)));
        assert_eq!(provider.metrics().reserved_bytes(), 0);
        Ok(())
    }

    #[test]
    fn misaligned_commit_result_is_rejected() -> TestResult {
        let mut provider = track!(ProviderBuilder::new().reserve_commit(unaligned_vm()))?;
        track!(provider.allocate(1))?;

        provider.vm_mut().shift_commits(0x1000);
        let e = provider.allocate(2).err().expect("must fail");
        assert_eq!(*e.kind(), ErrorKind::Misaligned);
        assert!(e.to_string().contains("0x10201000"), "{}", e);
        assert_eq!(provider.next_request(), Some(Address::new(0x1020_0000)));
        assert_eq!(provider.state(), PoolState::Reserved);
        assert_eq!(provider.total_allocated(), 1);
        assert_eq!(provider.metrics().failures().get(ErrorKind::Misaligned), 1);

        provider.vm_mut().shift_commits(0);
        assert_eq!(track!(provider.allocate(2))?, Address::new(0x1020_0000));
        assert_eq!(provider.total_allocated(), 3);
        Ok(())
    }

    #[test]
    fn commit_failures_do_not_advance_the_cursor() -> TestResult {
        let mut provider = track!(ProviderBuilder::new().reserve_commit(unaligned_vm()))?;
        track!(provider.allocate(1))?;

        provider.vm_mut().fail_next(ErrorKind::CommitFailed);
        let e = provider.allocate(1).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::CommitFailed));
        assert_eq!(provider.next_request(), Some(Address::new(0x1020_0000)));

        provider.vm_mut().commit_limit(2 << 20);
        let e = provider.allocate(2).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::OutOfMemory));
        assert_eq!(provider.state(), PoolState::Reserved);

        assert_eq!(track!(provider.allocate(1))?, Address::new(0x1020_0000));
        assert_eq!(provider.total_allocated(), 2);
        Ok(())
    }
}
