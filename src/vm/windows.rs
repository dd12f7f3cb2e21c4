use std::io;
use std::ptr;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};

use crate::megablock::Address;
use crate::vm::VirtualMemory;
use crate::{Error, ErrorKind, Result};

/// `VirtualAlloc`ベースの`VirtualMemory`の実装.
///
/// Windowsの仮想メモリAPIは二段階(予約とコミット)になっており、
/// 予約しただけの領域はページファイルも消費しない.
#[derive(Debug, Default, Clone)]
pub struct WindowsVm {}
impl WindowsVm {
    /// 新しい`WindowsVm`インスタンスを生成する.
    pub fn new() -> Self {
        WindowsVm {}
    }
}
impl VirtualMemory for WindowsVm {
    fn map(&mut self, hint: Address, size: usize) -> Result<Address> {
        // `VirtualAlloc`は指定位置が使用中なら失敗するので、`hint`は常に強制される
        let ret = unsafe {
            VirtualAlloc(
                hint.as_ptr() as *const _,
                size,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        if ret.is_null() {
            let e = io::Error::last_os_error();
            return Err(track!(Error::from_os_error(e, ErrorKind::MapFailed); hint, size));
        }
        Ok(Address::from(ret))
    }

    fn reserve(&mut self, size: usize) -> Result<Address> {
        let ret = unsafe { VirtualAlloc(ptr::null(), size, MEM_RESERVE, PAGE_READWRITE) };
        if ret.is_null() {
            let e = io::Error::last_os_error();
            track_panic!(
                ErrorKind::ReservationFailed,
                "VirtualAlloc failed: size={}, error={}",
                size,
                e
            );
        }
        Ok(Address::from(ret))
    }

    fn commit(&mut self, address: Address, size: usize) -> Result<Address> {
        let ret = unsafe {
            VirtualAlloc(
                address.as_ptr() as *const _,
                size,
                MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        if ret.is_null() {
            let e = io::Error::last_os_error();
            return Err(track!(Error::from_os_error(e, ErrorKind::CommitFailed); address, size));
        }
        Ok(Address::from(ret))
    }

    fn release(&mut self, address: Address, size: usize) -> Result<()> {
        // `MEM_RELEASE`では、`VirtualAlloc`で確保した領域全体が解放される (サイズは0を指定する)
        let ret = unsafe { VirtualFree(address.as_ptr() as *mut _, 0, MEM_RELEASE) };
        let result = if ret == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        };
        track_io!(result).map_err(|e| track!(e; address, size))
    }
}
