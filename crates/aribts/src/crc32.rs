//! MPEG-2 SystemsのPSI/SIで使われるCRC32。
//!
//! 生成多項式は`0x04C11DB7`、初期値は`0xFFFFFFFF`で、最上位ビットから処理し最終XORは行わない。

const POLYNOMIAL: u32 = 0x04C11DB7;

static TABLE: [u32; 256] = {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80000000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// `data`のCRC32を計算する。
///
/// 末尾にCRC32を含むセクション全体に対して計算した場合、正しければ`0`となる。
///
/// # サンプル
///
/// ```
/// assert_eq!(aribts::crc32::calc(b"123456789"), 0x0376E6E7);
/// ```
pub fn calc(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFFFFFF, |crc, &b| {
        (crc << 8) ^ TABLE[((crc >> 24) as u8 ^ b) as usize]
    })
}

/// 末尾4バイトにCRC32を含む`data`が正しいかどうかを返す。
#[inline]
pub fn is_valid(data: &[u8]) -> bool {
    calc(data) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32() {
        assert_eq!(calc(&[]), 0xFFFFFFFF);
        assert_eq!(calc(b"123456789"), 0x0376E6E7);

        // PAT（TSID=0x7FE0、サービス0x0400のPMTが0x01F0）
        let pat = hex_literal::hex!("00 B0 11 7F E0 C1 00 00 00 00 E0 10 04 00 E1 F0");
        let crc = calc(&pat);
        let section = [&pat[..], &crc.to_be_bytes()].concat();
        assert!(is_valid(&section));

        let mut broken = section.clone();
        *broken.last_mut().unwrap() ^= 0x01;
        assert!(!is_valid(&broken));
    }
}
