use std::io;
use std::ptr;

use crate::megablock::Address;
use crate::vm::VirtualMemory;
use crate::{Error, ErrorKind, Result};

/// `MmapVm::map`に渡された`hint`の扱い方.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `hint`は単なる候補として扱われ、OSが別の位置を選ぶこともある.
    Hint,

    /// `hint`の位置への配置を強制する.
    ///
    /// Linuxでは`MAP_FIXED_NOREPLACE`が使われるので、既存のマッピングが上書きされることはない
    /// (その位置が使用中なら`ErrorKind::MapFailed`となる).
    /// それ以外のOSでは`Placement::Hint`と同じ扱いとなる.
    Fixed,
}
impl Default for Placement {
    fn default() -> Self {
        Placement::Hint
    }
}

/// `mmap(2)`ベースの`VirtualMemory`の実装.
///
/// 予約は`PROT_NONE`のマッピングで、コミットは`mprotect(2)`で実現している.
#[derive(Debug, Default, Clone)]
pub struct MmapVm {
    placement: Placement,
}
impl MmapVm {
    /// 新しい`MmapVm`インスタンスを生成する.
    pub fn new() -> Self {
        Self::default()
    }

    /// `hint`の扱い方を指定して`MmapVm`インスタンスを生成する.
    pub fn with_placement(placement: Placement) -> Self {
        MmapVm { placement }
    }

    /// `hint`の扱い方を返す.
    pub fn placement(&self) -> Placement {
        self.placement
    }

    #[cfg(target_os = "linux")]
    fn placement_flags(&self) -> libc::c_int {
        match self.placement {
            Placement::Hint => 0,
            Placement::Fixed => libc::MAP_FIXED_NOREPLACE,
        }
    }
    #[cfg(not(target_os = "linux"))]
    fn placement_flags(&self) -> libc::c_int {
        0
    }

    #[cfg(target_os = "linux")]
    fn reserve_flags() -> libc::c_int {
        libc::MAP_NORESERVE
    }
    #[cfg(not(target_os = "linux"))]
    fn reserve_flags() -> libc::c_int {
        0
    }
}
impl VirtualMemory for MmapVm {
    fn map(&mut self, hint: Address, size: usize) -> Result<Address> {
        let flags = libc::MAP_ANON | libc::MAP_PRIVATE | self.placement_flags();
        let ret = unsafe {
            libc::mmap(
                hint.as_ptr() as *mut libc::c_void,
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if ret == libc::MAP_FAILED {
            let e = io::Error::last_os_error();
            return Err(track!(Error::from_os_error(e, ErrorKind::MapFailed); hint, size));
        }
        Ok(Address::from(ret))
    }

    fn reserve(&mut self, size: usize) -> Result<Address> {
        let flags = libc::MAP_ANON | libc::MAP_PRIVATE | Self::reserve_flags();
        let ret = unsafe { libc::mmap(ptr::null_mut(), size, libc::PROT_NONE, flags, -1, 0) };
        if ret == libc::MAP_FAILED {
            let e = io::Error::last_os_error();
            track_panic!(
                ErrorKind::ReservationFailed,
                "mmap failed: size={}, error={}",
                size,
                e
            );
        }
        Ok(Address::from(ret))
    }

    fn commit(&mut self, address: Address, size: usize) -> Result<Address> {
        let ret = unsafe {
            libc::mprotect(
                address.as_ptr() as *mut libc::c_void,
                size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if ret != 0 {
            let e = io::Error::last_os_error();
            return Err(track!(Error::from_os_error(e, ErrorKind::CommitFailed); address, size));
        }
        Ok(address)
    }

    fn release(&mut self, address: Address, size: usize) -> Result<()> {
        let ret = unsafe { libc::munmap(address.as_ptr() as *mut libc::c_void, size) };
        track_io!(cvt(ret)).map_err(|e| track!(e; address, size))
    }
}

fn cvt(ret: libc::c_int) -> io::Result<()> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
