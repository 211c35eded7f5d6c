//! PSI/SIセクション用のモジュール。

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::utils::BytesExt;

/// セクションの最大長（`table_id`からセクション長までの3バイトと12ビットのセクション長）。
pub const MAX_SECTION_SIZE: usize = 3 + 0x0FFF;

/// 後続するセクションがないことを示す`table_id`。
pub const STUFFING_TABLE_ID: u8 = 0xFF;

/// TOTのテーブルID。セクションシンタクスを持たないがCRCを持つ。
const TOT_TABLE_ID: u8 = 0x73;

/// [`PsiSection::parse`]で発生するエラー。
///
/// セクション長が確定したあとで発生するエラーにはセクション長が付随する。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PsiError {
    /// PSIセクションの長さが足りない。
    #[error("insufficient length of a PSI section")]
    InsufficientLength,

    /// PSIの終端に到達した。
    #[error("reached to end of PSI sections")]
    EndOfPsi,

    /// PSIセクションに最低限必要なバイト数がなく、壊れたセクションである。
    ///
    /// 内包する`usize`にはPSIのセクション長が入る。
    #[error("corrupt section")]
    Corrupted(usize),

    /// PSIセクションのCRC32が一致しない。
    ///
    /// 内包する`usize`にはPSIのセクション長が入る。
    #[error("crc32 error")]
    Crc32(usize),
}

/// `buf`の先頭にあるセクションの長さ（`3 + section_length`）を返す。
///
/// 3バイトに満たない場合は`None`を返す。
#[inline]
pub fn section_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 3 {
        return None;
    }
    Some(3 + (buf[1..=2].read_be_16() & 0x0FFF) as usize)
}

/// PSIのセクション。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiSection<'a> {
    /// テーブル識別。
    pub table_id: u8,
    /// セクションシンタクス。
    pub syntax: Option<PsiSectionSyntax>,
    /// PSIのデータ。
    pub data: &'a [u8],
    /// CRC。TDTなどCRCを持たないセクションでは`None`となる。
    pub crc32: Option<u32>,
}

impl<'a> PsiSection<'a> {
    /// PSIセクションをパースし、[`PsiSection`]とセクション長を返す。
    ///
    /// セクションシンタクスを持つセクションとTOTではCRC32を検証する。
    pub fn parse(buf: &'a [u8]) -> Result<(PsiSection<'a>, usize), PsiError> {
        let Some(len) = section_len(buf) else {
            return Err(PsiError::InsufficientLength);
        };

        let table_id = buf[0];
        if table_id == STUFFING_TABLE_ID {
            return Err(PsiError::EndOfPsi);
        }
        let section_syntax_indicator = buf[1] & 0b10000000 != 0;

        let Some(psi) = buf.get(..len) else {
            return Err(PsiError::InsufficientLength);
        };

        let has_crc32 = section_syntax_indicator || table_id == TOT_TABLE_ID;
        if has_crc32 {
            if psi.len() < 3 + 4 {
                return Err(PsiError::Corrupted(psi.len()));
            }
            if !crate::crc32::is_valid(psi) {
                return Err(PsiError::Crc32(psi.len()));
            }
        }

        let (syntax, data) = if section_syntax_indicator {
            if psi.len() < 3 + 5 + 4 {
                return Err(PsiError::Corrupted(psi.len()));
            }

            let table_id_extension = psi[3..=4].read_be_16();
            let version_number = (psi[5] & 0b00111110) >> 1;
            let current_next_indicator = psi[5] & 0b00000001 != 0;
            let section_number = psi[6];
            let last_section_number = psi[7];

            let ss = PsiSectionSyntax {
                table_id_extension,
                version_number,
                current_next_indicator,
                section_number,
                last_section_number,
            };
            (Some(ss), &psi[8..psi.len() - 4])
        } else if has_crc32 {
            (None, &psi[3..psi.len() - 4])
        } else {
            (None, &psi[3..])
        };

        let crc32 = has_crc32.then(|| psi[psi.len() - 4..].read_be_32());

        Ok((
            PsiSection {
                table_id,
                syntax,
                data,
                crc32,
            },
            psi.len(),
        ))
    }
}

/// PSIセクションのシンタクス。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiSectionSyntax {
    /// テーブル識別拡張。
    pub table_id_extension: u16,
    /// バージョン番号（5ビット）。
    pub version_number: u8,
    /// カレントネクスト指示。
    pub current_next_indicator: bool,
    /// セクション番号。
    pub section_number: u8,
    /// 最終セクション番号。
    pub last_section_number: u8,
}

/// 複数のパケットにまたがるセクションを組み立てるためのバッファ。
///
/// 組み立て中は`len() <= entire_len()`が常に成り立つ。
#[derive(Clone)]
pub struct SectionBuffer {
    buffer: Box<ArrayVec<u8, MAX_SECTION_SIZE>>,
    entire_len: usize,
}

impl SectionBuffer {
    /// 空の`SectionBuffer`を生成する。
    #[inline]
    pub fn new() -> SectionBuffer {
        SectionBuffer {
            buffer: Box::new(ArrayVec::new()),
            entire_len: 0,
        }
    }

    /// 蓄積したバイト数を返す。
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// 何も蓄積していないかどうかを返す。
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 組み立て中のセクション全体の長さを返す。組み立て中でなければ`0`を返す。
    #[inline]
    pub fn entire_len(&self) -> usize {
        self.entire_len
    }

    /// セクションの完成に必要な残りのバイト数を返す。
    #[inline]
    pub fn remaining(&self) -> usize {
        self.entire_len.saturating_sub(self.buffer.len())
    }

    /// 全体の長さが`entire_len`であるセクションの先頭部分`chunk`から組み立てを始める。
    pub fn start(&mut self, chunk: &[u8], entire_len: usize) {
        self.reset();
        self.entire_len = entire_len.min(MAX_SECTION_SIZE);
        self.push(chunk);
    }

    /// `chunk`を追記する。セクション全体の長さを超える部分は捨てる。
    ///
    /// 追記したバイト数を返す。
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        let len = std::cmp::min(self.remaining(), chunk.len());
        let _result = self.buffer.try_extend_from_slice(&chunk[..len]);
        debug_assert!(_result.is_ok());
        len
    }

    /// セクションが完成したかどうかを返す。
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.entire_len > 0 && self.buffer.len() == self.entire_len
    }

    /// 蓄積したバイト列を返す。
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// 蓄積したバイト列と全体の長さを消去する。
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.entire_len = 0;
    }
}

impl Default for SectionBuffer {
    #[inline]
    fn default() -> SectionBuffer {
        SectionBuffer::new()
    }
}

impl std::fmt::Debug for SectionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SectionBuffer")
            .field("len", &self.len())
            .field("entire_len", &self.entire_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let crc = crate::crc32::calc(body);
        [body, &crc.to_be_bytes()].concat()
    }

    #[test]
    fn test_section_len() {
        assert_eq!(section_len(&[0x00, 0xB0]), None);
        assert_eq!(section_len(&[0x00, 0xB0, 0x11]), Some(20));
        assert_eq!(section_len(&[0x00, 0xFF, 0xFF]), Some(3 + 0x0FFF));
    }

    #[test]
    fn test_parse_with_syntax() {
        let pat = with_crc(&hex_literal::hex!(
            "00 B0 11 7F E0 C1 00 00 00 00 E0 10 04 00 E1 F0"
        ));
        let buf = [&pat[..], &[0xFF; 8]].concat();
        let (psi, len) = PsiSection::parse(&buf).unwrap();
        assert_eq!(len, 20);
        assert_eq!(psi.table_id, 0x00);
        assert_eq!(
            psi.syntax,
            Some(PsiSectionSyntax {
                table_id_extension: 0x7FE0,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            })
        );
        assert_eq!(psi.data, &hex_literal::hex!("00 00 E0 10 04 00 E1 F0"));
        assert_eq!(psi.crc32, Some(crate::crc32::calc(&pat[..16])));

        assert_matches!(PsiSection::parse(&buf[20..]), Err(PsiError::EndOfPsi));
        assert_matches!(
            PsiSection::parse(&pat[..19]),
            Err(PsiError::InsufficientLength)
        );

        let mut broken = pat.clone();
        broken[10] ^= 0x01;
        assert_matches!(PsiSection::parse(&broken), Err(PsiError::Crc32(20)));
    }

    #[test]
    fn test_parse_without_syntax() {
        // TDT: CRCを持たない
        let tdt = hex_literal::hex!("70 70 05 E4 9B 12 34 56");
        let (psi, len) = PsiSection::parse(&tdt).unwrap();
        assert_eq!(len, 8);
        assert_eq!(psi.syntax, None);
        assert_eq!(psi.data, &tdt[3..]);
        assert_eq!(psi.crc32, None);

        // TOT: セクションシンタクスを持たないがCRCを持つ
        let tot = with_crc(&hex_literal::hex!("73 70 0B E4 9B 12 34 56 F0 00"));
        let (psi, _) = PsiSection::parse(&tot).unwrap();
        assert_eq!(psi.data, &tot[3..10]);
        assert!(psi.crc32.is_some());

        let tot = hex_literal::hex!("73 70 02 00 00");
        assert_matches!(PsiSection::parse(&tot), Err(PsiError::Corrupted(5)));
    }

    #[test]
    fn test_section_buffer() {
        let mut buf = SectionBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.entire_len(), 0);
        assert!(!buf.is_complete());

        buf.start(&[1, 2, 3, 4, 5, 6], 10);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.entire_len(), 10);
        assert_eq!(buf.remaining(), 4);
        assert!(!buf.is_complete());

        assert_eq!(buf.push(&[7, 8, 9, 10, 11, 12]), 4);
        assert!(buf.is_complete());
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.entire_len(), 0);
        assert_eq!(buf.push(&[1]), 0);
    }
}
