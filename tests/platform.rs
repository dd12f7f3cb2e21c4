#![cfg(unix)]
extern crate mblock;
#[macro_use]
extern crate trackable;

use mblock::megablock::Address;
use mblock::provider::{BumpProvider, MegablockProvider, PoolState, ProviderBuilder};
use mblock::vm::{MmapVm, Placement};
use mblock::ErrorKind;
use trackable::result::TestResult;

#[test]
fn reserve_commit_over_mmap_works() -> TestResult {
    let mut provider = track!(ProviderBuilder::new()
        .max_heap_size(8 << 20)
        .reserve_commit(MmapVm::new()))?;

    let a = track!(provider.allocate(2))?;
    assert_eq!(a.as_usize() % (1 << 20), 0);
    assert!(provider.is_heap_address(a));

    // コミット済みの領域は読み書き可能
    unsafe {
        let last = a.as_ptr().add((2 << 20) - 1);
        *a.as_ptr() = 1;
        *last = 2;
        assert_eq!(*a.as_ptr(), 1);
        assert_eq!(*last, 2);
    }

    let b = track!(provider.allocate(1))?;
    assert_eq!(b, Address::new(a.as_usize() + (2 << 20)));
    assert_eq!(provider.total_allocated(), 3);

    // 8MiBの予約からは、境界を揃えた後でも7メガブロック以上が使える
    let remaining = provider.remaining_megablocks();
    assert!(remaining >= 4, "remaining={}", remaining);
    let e = provider.allocate(remaining + 1).err();
    assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::HeapExhausted));
    assert_eq!(provider.state(), PoolState::Exhausted);
    Ok(())
}

#[cfg(target_pointer_width = "64")]
#[test]
fn mmap_results_are_checked_for_alignment() -> TestResult {
    // ヒントの位置に配置されるかどうかはOS次第だが、
    // 成功した場合には必ずメガブロック境界に揃っている
    let mut provider = track!(ProviderBuilder::new()
        .heap_base(Address::new(0x6000_0000_0000))
        .bump(MmapVm::new()))?;
    match provider.allocate(1) {
        Ok(a) => {
            assert_eq!(a.as_usize() % (1 << 20), 0);
            assert_eq!(provider.total_allocated(), 1);
        }
        Err(e) => {
            assert_eq!(*e.kind(), ErrorKind::Misaligned, "{}", e);
            assert_eq!(provider.total_allocated(), 0);
        }
    }
    Ok(())
}

#[test]
fn platform_provider_works() -> TestResult {
    let mut provider: BumpProvider<MmapVm> = track!(ProviderBuilder::new().platform())?;
    assert_eq!(provider.vm().placement(), Placement::Hint);
    assert_eq!(
        provider.next_request(),
        Address::new(ProviderBuilder::DEFAULT_HEAP_BASE)
    );

    // 既定の基底アドレスが他のマッピングと衝突していれば、ヒントは無視され得る
    match provider.allocate(2) {
        Ok(a) => {
            assert_eq!(a.as_usize() % (1 << 20), 0);
            assert_eq!(provider.next_request(), Address::new(0x5020_0000));
            unsafe {
                *a.as_ptr() = 3;
                assert_eq!(*a.as_ptr(), 3);
            }
        }
        Err(e) => {
            assert_eq!(*e.kind(), ErrorKind::Misaligned, "{}", e);
            assert_eq!(provider.next_request(), Address::new(0x5000_0000));
        }
    }
    Ok(())
}
