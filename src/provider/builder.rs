use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};

use super::{BumpProvider, ReserveCommitProvider, ReservedPool};
use crate::megablock::{Address, MegablockSize};
use crate::metrics::{AllocationCounter, ProviderMetrics};
use crate::vm::{PlatformVm, VirtualMemory};
use crate::{ErrorKind, Result};

/// ビルド対象のOSで使用されるプロバイダ.
///
/// Unix系OSでは`BumpProvider`が使われる.
#[cfg(unix)]
pub type PlatformProvider = BumpProvider<PlatformVm>;

/// ビルド対象のOSで使用されるプロバイダ.
///
/// Windowsでは`ReserveCommitProvider`が使われる.
#[cfg(windows)]
pub type PlatformProvider = ReserveCommitProvider<PlatformVm>;

/// メガブロックプロバイダのビルダ.
#[derive(Debug, Clone)]
pub struct ProviderBuilder {
    megablock_size: MegablockSize,
    heap_base: Address,
    max_heap_size: Option<u64>,
    logger: Logger,
    metrics: MetricBuilder,
    allocation_counter: Option<AllocationCounter>,
}
impl ProviderBuilder {
    /// `heap_base`のデフォルト値.
    pub const DEFAULT_HEAP_BASE: usize = 0x5000_0000;

    /// デフォルト設定で`ProviderBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        ProviderBuilder {
            megablock_size: MegablockSize::default(),
            heap_base: Address::new(Self::DEFAULT_HEAP_BASE),
            max_heap_size: None,
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
            allocation_counter: None,
        }
    }

    /// メガブロックのサイズを設定する.
    ///
    /// デフォルト値は`MegablockSize::default()` (1MiB).
    pub fn megablock_size(&mut self, size: MegablockSize) -> &mut Self {
        self.megablock_size = size;
        self
    }

    /// ヒープの基底アドレスを設定する.
    ///
    /// `BumpProvider`が最初のマッピングのヒントとして使用する.
    /// メガブロック境界に揃っていない値が指定された場合には、プロバイダの構築時にエラーとなる.
    ///
    /// デフォルト値は`0x5000_0000`.
    pub fn heap_base(&mut self, base: Address) -> &mut Self {
        self.heap_base = base;
        self
    }

    /// 最大ヒープサイズ(バイト単位)を設定する.
    ///
    /// `ReserveCommitProvider`の予約サイズとして使用される.
    /// ただしメガブロック二つ分が下限となる.
    ///
    /// `0`を指定した場合、あるいは本メソッドが呼ばれていない場合には、
    /// `ReservedPool::DEFAULT_SIZE` (256MiB) が使われる.
    pub fn max_heap_size(&mut self, bytes: u64) -> &mut Self {
        self.max_heap_size = Some(bytes);
        self
    }

    /// 割り当てイベントの出力先となる logger を登録する.
    ///
    /// デフォルトでは何も出力されない.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// 割り当てたメガブロック数のカウンタを指定する.
    ///
    /// 複数のプロバイダで同じカウンタを共有する場合に使用する.
    /// 本メソッドが呼ばれていない場合には、プロバイダ毎に新しいカウンタが作られる.
    pub fn allocation_counter(&mut self, counter: AllocationCounter) -> &mut Self {
        self.allocation_counter = Some(counter);
        self
    }

    /// `BumpProvider`を生成する.
    pub fn bump<V: VirtualMemory>(&self, vm: V) -> Result<BumpProvider<V>> {
        track_assert!(
            self.megablock_size.is_aligned(self.heap_base.as_usize()),
            ErrorKind::InvalidInput,
            "Unaligned heap base: {} (megablock_size={})",
            self.heap_base,
            self.megablock_size.as_usize()
        );
        let logger = self.logger.new(o!("provider" => "bump"));
        Ok(BumpProvider::new(
            vm,
            self.megablock_size,
            self.heap_base,
            logger,
            self.provider_metrics(),
        ))
    }

    /// `ReserveCommitProvider`を生成する.
    ///
    /// この時点では、まだアドレス空間の予約は行われない.
    pub fn reserve_commit<V: VirtualMemory>(&self, vm: V) -> Result<ReserveCommitProvider<V>> {
        let reservation_size =
            track!(ReservedPool::size_for(self.max_heap_size, self.megablock_size))?;
        let logger = self.logger.new(o!("provider" => "reserve_commit"));
        Ok(ReserveCommitProvider::new(
            vm,
            self.megablock_size,
            reservation_size,
            self.max_heap_size,
            logger,
            self.provider_metrics(),
        ))
    }

    /// ビルド対象のOSに応じたプロバイダを生成する.
    #[cfg(unix)]
    pub fn platform(&self) -> Result<PlatformProvider> {
        track!(self.bump(PlatformVm::new()))
    }

    /// ビルド対象のOSに応じたプロバイダを生成する.
    #[cfg(windows)]
    pub fn platform(&self) -> Result<PlatformProvider> {
        track!(self.reserve_commit(PlatformVm::new()))
    }

    fn provider_metrics(&self) -> ProviderMetrics {
        let counter = self
            .allocation_counter
            .clone()
            .unwrap_or_else(|| AllocationCounter::new(&self.metrics));
        ProviderMetrics::new(&self.metrics, counter, self.megablock_size)
    }
}
impl Default for ProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::provider::MegablockProvider;
    use crate::vm::SimulatedVm;

    #[test]
    fn unaligned_heap_base_is_rejected() {
        let e = ProviderBuilder::new()
            .heap_base(Address::new(0x5000_1000))
            .bump(SimulatedVm::new())
            .err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    }

    #[test]
    fn custom_megablock_size_works() -> TestResult {
        let mut provider = track!(ProviderBuilder::new()
            .megablock_size(track!(MegablockSize::new(1 << 22))?)
            .heap_base(Address::new(0x4000_0000))
            .bump(SimulatedVm::new()))?;
        assert_eq!(track!(provider.allocate(1))?, Address::new(0x4000_0000));
        assert_eq!(track!(provider.allocate(1))?, Address::new(0x4040_0000));
        assert_eq!(provider.metrics().allocated_bytes(), 8 << 20);
        Ok(())
    }

    #[test]
    fn allocation_counter_can_be_shared() -> TestResult {
        let counter = AllocationCounter::new(&MetricBuilder::new());
        let mut builder = ProviderBuilder::new();
        builder.allocation_counter(counter.clone());

        let mut bump = track!(builder.bump(SimulatedVm::new()))?;
        let mut reserve_commit = track!(builder.reserve_commit(SimulatedVm::new()))?;
        track!(bump.allocate(2))?;
        track!(reserve_commit.allocate(3))?;
        track!(bump.allocate(1))?;

        assert_eq!(counter.total_allocated(), 6);
        assert_eq!(bump.total_allocated(), 6);
        assert_eq!(reserve_commit.total_allocated(), 6);
        assert_eq!(bump.metrics().allocated_bytes(), 3 << 20);
        Ok(())
    }
}
