/// バイト列用拡張トレイト。
pub trait BytesExt {
    /// 先頭2バイトをビッグエンディアンの16ビット符号無し整数として読み込む。
    ///
    /// 事前に長さが2以上あると分かるようなコードであれば最適化が期待できる。
    fn read_be_16(&self) -> u16;

    /// 先頭4バイトをビッグエンディアンの32ビット符号無し整数として読み込む。
    ///
    /// 事前に長さが4以上あると分かるようなコードであれば最適化が期待できる。
    fn read_be_32(&self) -> u32;
}

impl BytesExt for [u8] {
    #[inline]
    fn read_be_16(&self) -> u16 {
        u16::from_be_bytes([self[0], self[1]])
    }

    #[inline]
    fn read_be_32(&self) -> u32 {
        u32::from_be_bytes([self[0], self[1], self[2], self[3]])
    }
}

/// `data`の`index`番目のバイトを返す。範囲外であれば`0`を返す。
///
/// 途中で切れたパケットを読む際に使う。
#[inline]
pub fn byte_at(data: &[u8], index: usize) -> u8 {
    data.get(index).copied().unwrap_or(0)
}

/// `data`の`range`の範囲を返す。範囲が`data`を超える場合は切り詰める。
#[inline]
pub fn clamped(data: &[u8], start: usize, end: usize) -> &[u8] {
    let end = end.min(data.len());
    data.get(start..end).unwrap_or(&[])
}

/// 内包する整数の書式化を委譲する。
macro_rules! delegate_fmt {
    ($name:ident) => {
        crate::utils::delegate_fmt!(
            $name: Display, Binary, Octal, LowerHex, UpperHex,
        );
    };
    ($name:ident: $($trait:ident),*$(,)?) => {
        $(
            impl std::fmt::$trait for $name {
                #[inline]
                fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    std::fmt::$trait::fmt(&self.0, f)
                }
            }
        )*
    };
}

// マクロはpub useできない
pub(crate) use delegate_fmt;
