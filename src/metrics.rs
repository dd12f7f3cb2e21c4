//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

use crate::megablock::MegablockSize;
use crate::ErrorKind;

/// これまでに割り当てられたメガブロックの総数.
///
/// 複数のプロバイダ間で共有したい場合には、インスタンスを`clone`して
/// 各プロバイダのビルダに渡せば良い (内部のカウンタは共有される).
///
/// メガブロックの解放操作は存在しないので、この値が減ることはない.
#[derive(Debug, Clone)]
pub struct AllocationCounter {
    megablocks: Counter,
}
impl AllocationCounter {
    /// 新しい`AllocationCounter`インスタンスを生成する.
    pub fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("mblock").subsystem("provider");
        AllocationCounter {
            megablocks: builder
                .counter("allocated_megablocks_total")
                .help("Number of megablocks allocated from the OS")
                .finish()
                .expect("Never fails"),
        }
    }

    /// 割り当てに成功したメガブロック数の合計.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mblock_provider_allocated_megablocks_total <COUNTER>
    /// ```
    pub fn total_allocated(&self) -> u64 {
        self.megablocks.value() as u64
    }

    pub(crate) fn add(&self, n: usize) {
        self.megablocks.add_u64(n as u64);
    }
}

/// メガブロックプロバイダのメトリクス.
#[derive(Debug, Clone)]
pub struct ProviderMetrics {
    pub(crate) allocation_counter: AllocationCounter,
    pub(crate) allocated_bytes: Counter,
    pub(crate) reserved_bytes: Gauge,
    pub(crate) failures: FailureCounter,
    pub(crate) megablock_size: MegablockSize,
}
impl ProviderMetrics {
    /// 割り当てに成功したメガブロック数の合計.
    ///
    /// 同じ`AllocationCounter`を共有している全てのプロバイダでの割り当てが含まれる.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mblock_provider_allocated_megablocks_total <COUNTER>
    /// ```
    pub fn total_allocated(&self) -> u64 {
        self.allocation_counter.total_allocated()
    }

    /// このプロバイダが割り当てたバイト数の合計.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mblock_provider_allocated_bytes_total <COUNTER>
    /// ```
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.value() as u64
    }

    /// 予約済みのアドレス空間のバイト数.
    ///
    /// 予約を行わないプロバイダでは常に`0`となる.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mblock_provider_reserved_bytes <GAUGE>
    /// ```
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes.value() as u64
    }

    /// 割り当てに失敗した回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// mblock_provider_failures_total { kind="out_of_memory|map_failed|..." } <COUNTER>
    /// ```
    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    /// 共有されているメガブロック数カウンタを返す.
    pub fn allocation_counter(&self) -> &AllocationCounter {
        &self.allocation_counter
    }

    pub(crate) fn new(
        builder: &MetricBuilder,
        allocation_counter: AllocationCounter,
        megablock_size: MegablockSize,
    ) -> Self {
        let mut builder = builder.clone();
        builder.namespace("mblock").subsystem("provider");
        ProviderMetrics {
            allocation_counter,
            allocated_bytes: builder
                .counter("allocated_bytes_total")
                .help("Number of bytes allocated from the OS")
                .finish()
                .expect("Never fails"),
            reserved_bytes: builder
                .gauge("reserved_bytes")
                .help("Size of the reserved address space")
                .finish()
                .expect("Never fails"),
            failures: FailureCounter::new(&builder),
            megablock_size,
        }
    }

    pub(crate) fn count_allocation(&self, n: usize) {
        self.allocation_counter.add(n);
        self.allocated_bytes
            .add_u64((n * self.megablock_size.as_usize()) as u64);
    }
}

/// エラーの種類毎の失敗回数.
#[derive(Debug, Clone)]
pub struct FailureCounter {
    counters: Vec<(ErrorKind, Counter)>,
}
impl FailureCounter {
    const KINDS: [ErrorKind; 8] = [
        ErrorKind::OutOfMemory,
        ErrorKind::MapFailed,
        ErrorKind::CommitFailed,
        ErrorKind::Misaligned,
        ErrorKind::ReservationFailed,
        ErrorKind::ReservationTooSmall,
        ErrorKind::HeapExhausted,
        ErrorKind::InvalidInput,
    ];

    /// 指定された種類の失敗回数を返す.
    pub fn get(&self, kind: ErrorKind) -> u64 {
        self.counter(kind).map_or(0, |c| c.value() as u64)
    }

    /// 全ての種類の失敗回数の合計を返す.
    pub fn sum(&self) -> u64 {
        self.counters.iter().map(|(_, c)| c.value() as u64).sum()
    }

    pub(crate) fn increment(&self, kind: ErrorKind) {
        if let Some(c) = self.counter(kind) {
            c.increment();
        }
    }

    fn counter(&self, kind: ErrorKind) -> Option<&Counter> {
        self.counters
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, c)| c)
    }

    fn new(builder: &MetricBuilder) -> Self {
        let counters = Self::KINDS
            .iter()
            .map(|&kind| {
                let counter = builder
                    .counter("failures_total")
                    .help("Number of failed megablock allocations")
                    .label("kind", kind.as_str())
                    .finish()
                    .expect("Never fails");
                (kind, counter)
            })
            .collect();
        FailureCounter { counters }
    }
}
