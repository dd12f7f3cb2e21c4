use std::fmt;

/// 仮想アドレス.
///
/// `SimulatedVm`が返すアドレスのように、実際にはマッピングされていない値も表現し得るので、
/// ポインタではなく整数として保持している.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Address(usize);
impl Address {
    /// 値を指定して`Address`を生成する.
    pub const fn new(value: usize) -> Self {
        Address(value)
    }

    /// アドレスの値を返す.
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// アドレスをポインタに変換する.
    pub fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// `bytes`だけ後方のアドレスを返す.
    ///
    /// オーバーフローする場合には`None`が返される.
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Address)
    }
}
impl From<usize> for Address {
    fn from(from: usize) -> Self {
        Address(from)
    }
}
impl<T> From<*mut T> for Address {
    fn from(from: *mut T) -> Self {
        Address(from as usize)
    }
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
