use slog::Logger;

use super::{count_failure, verify_alignment, Cursor, MegablockProvider};
use crate::megablock::{Address, MegablockSize};
use crate::metrics::ProviderMetrics;
use crate::vm::VirtualMemory;
use crate::Result;

/// カーソルを単調に進めながら、要求毎にマッピングを作成するプロバイダ.
///
/// カーソルはヒープの基底アドレスから始まり、`allocate(n)`の度に、
/// その位置をヒントとして`n`メガブロック分の匿名マッピングを作成した上で、その分だけ進められる.
///
/// OSがヒントに従う限り、割り当てられる領域は連続する.
/// ヒントが無視されて、メガブロック境界に揃っていないアドレスが返された場合には、
/// そのマッピングを解放した上で、`ErrorKind::Misaligned`のエラーとなる.
#[derive(Debug)]
pub struct BumpProvider<V> {
    vm: V,
    megablock_size: MegablockSize,
    next_request: Cursor,
    logger: Logger,
    metrics: ProviderMetrics,
}
impl<V: VirtualMemory> BumpProvider<V> {
    pub(crate) fn new(
        vm: V,
        megablock_size: MegablockSize,
        heap_base: Address,
        logger: Logger,
        metrics: ProviderMetrics,
    ) -> Self {
        BumpProvider {
            vm,
            megablock_size,
            next_request: Cursor(heap_base),
            logger,
            metrics,
        }
    }

    /// 次の割り当て要求で使われるアドレス(ヒント)を返す.
    pub fn next_request(&self) -> Address {
        self.next_request.position()
    }

    /// 内部で使用している`VirtualMemory`への参照を返す.
    pub fn vm(&self) -> &V {
        &self.vm
    }

    /// 内部で使用している`VirtualMemory`への可変参照を返す.
    pub fn vm_mut(&mut self) -> &mut V {
        &mut self.vm
    }

    fn allocate_impl(&mut self, n: usize) -> Result<Address> {
        let size = track!(self.megablock_size.bytes_for(n))?;
        let expected = self.next_request.position();
        let next_request = track!(self.next_request.advanced(size))?;

        let ret = track!(self.vm.map(expected, size))?;
        if let Err(e) = verify_alignment(self.megablock_size, ret, n, expected) {
            // 作成したマッピングは利用者に渡らないので、その場で取り消す
            if let Err(release_error) = self.vm.release(ret, size) {
                warn!(
                    self.logger,
                    "Cannot release a misaligned mapping at {}", ret;
                    "size" => size,
                    "error" => %release_error
                );
            }
            return Err(track!(e));
        }
        debug!(self.logger, "Allocated {} megablock(s) at {}", n, ret);

        self.next_request = next_request;
        self.metrics.count_allocation(n);
        Ok(ret)
    }
}
impl<V: VirtualMemory> MegablockProvider for BumpProvider<V> {
    fn allocate(&mut self, n: usize) -> Result<Address> {
        let result = track!(self.allocate_impl(n));
        count_failure(&self.metrics, result)
    }

    fn megablock_size(&self) -> MegablockSize {
        self.megablock_size
    }

    fn metrics(&self) -> &ProviderMetrics {
        &self.metrics
    }
}
