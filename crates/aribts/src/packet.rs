//! MPEG2-TSのパケット。
//!
//! パケットの読み方は3通りある。
//!
//! * [`PacketHeader::decode_basic`]：ヘッダとアダプテーションフィールドのフラグのみを固定位置から読む。
//!   全てのパケットに対して呼ばれるため軽量である。
//! * [`TsPacket::decode`]：アダプテーションフィールドの任意フィールドまで全て読む。
//!   [`TsPacket::encode`]で書き戻すことができる。
//! * [`is_pes`]、[`adaptation_field`]、[`payload`]：デコードせずに必要な範囲だけを切り出す。
//!
//! いずれも188バイトに満たないバイト列を受け付け、足りない部分は`0`または空として扱う。

use std::fmt;
use std::io::{self, Read};

use thiserror::Error;

use crate::bit::{BitReader, BitWriter};
use crate::pid::Pid;
use crate::utils::{byte_at, clamped};

/// 同期バイト。
pub const SYNC_BYTE: u8 = 0x47;
/// パケットの大きさ。
pub const PACKET_SIZE: usize = 188;

/// アダプテーションフィールド制御（2ビット）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdaptationFieldControl {
    /// 未定義（`00`）。
    Reserved,
    /// ペイロードのみ（`01`）。
    PayloadOnly,
    /// アダプテーションフィールドのみ（`10`）。
    AdaptationOnly,
    /// アダプテーションフィールドとペイロード（`11`）。
    Both,
}

impl AdaptationFieldControl {
    /// 下位2ビットから`AdaptationFieldControl`を生成する。
    #[inline]
    pub fn from_bits(bits: u8) -> AdaptationFieldControl {
        match bits & 0b11 {
            0b00 => AdaptationFieldControl::Reserved,
            0b01 => AdaptationFieldControl::PayloadOnly,
            0b10 => AdaptationFieldControl::AdaptationOnly,
            _ => AdaptationFieldControl::Both,
        }
    }

    /// 2ビットの値を返す。
    #[inline]
    pub fn bits(self) -> u8 {
        match self {
            AdaptationFieldControl::Reserved => 0b00,
            AdaptationFieldControl::PayloadOnly => 0b01,
            AdaptationFieldControl::AdaptationOnly => 0b10,
            AdaptationFieldControl::Both => 0b11,
        }
    }

    /// アダプテーションフィールドを含むかどうかを返す。
    #[inline]
    pub fn has_adaptation_field(self) -> bool {
        self.bits() & 0b10 != 0
    }

    /// ペイロードを含むかどうかを返す。
    #[inline]
    pub fn has_payload(self) -> bool {
        self.bits() & 0b01 != 0
    }
}

/// アダプテーションフィールドの先頭にある8つのフラグ。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AdaptationFlags {
    /// 不連続性インジケーター。
    pub discontinuity_indicator: bool,
    /// ランダムアクセスインジケーター。
    pub random_access_indicator: bool,
    /// エレメンタリーストリーム優先度インジケーター。
    pub es_priority_indicator: bool,
    /// PCRフラグ。
    pub pcr_flag: bool,
    /// オリジナルPCRフラグ。
    pub opcr_flag: bool,
    /// 編集点フラグ。
    pub splicing_point_flag: bool,
    /// プライベートデータフラグ。
    pub transport_private_data_flag: bool,
    /// 拡張フラグ。
    pub extension_flag: bool,
}

impl AdaptationFlags {
    /// 1バイトからフラグを読み取る。
    #[inline]
    pub fn from_byte(b: u8) -> AdaptationFlags {
        AdaptationFlags {
            discontinuity_indicator: b & 0b10000000 != 0,
            random_access_indicator: b & 0b01000000 != 0,
            es_priority_indicator: b & 0b00100000 != 0,
            pcr_flag: b & 0b00010000 != 0,
            opcr_flag: b & 0b00001000 != 0,
            splicing_point_flag: b & 0b00000100 != 0,
            transport_private_data_flag: b & 0b00000010 != 0,
            extension_flag: b & 0b00000001 != 0,
        }
    }

    /// フラグを1バイトにまとめる。
    pub fn to_byte(&self) -> u8 {
        (self.discontinuity_indicator as u8) << 7
            | (self.random_access_indicator as u8) << 6
            | (self.es_priority_indicator as u8) << 5
            | (self.pcr_flag as u8) << 4
            | (self.opcr_flag as u8) << 3
            | (self.splicing_point_flag as u8) << 2
            | (self.transport_private_data_flag as u8) << 1
            | (self.extension_flag as u8)
    }
}

/// [`PacketHeader::decode_basic`]で読まれるアダプテーションフィールド。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicAdaptationField {
    /// アダプテーションフィールド長。
    pub length: u8,
    /// フラグ。アダプテーションフィールド長が`0`の場合は存在しない。
    pub flags: Option<AdaptationFlags>,
}

/// パケットのヘッダ。
///
/// [`PacketHeader::decode_basic`]で生成する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketHeader {
    /// 同期バイト。
    pub sync_byte: u8,
    /// トランスポートエラーインジケーター。
    pub transport_error_indicator: bool,
    /// ペイロードユニット開始インジケーター。
    pub payload_unit_start_indicator: bool,
    /// トランスポート優先度。
    pub transport_priority: bool,
    /// PID。
    pub pid: Pid,
    /// トランスポートスクランブル制御（2ビット）。
    pub transport_scrambling_control: u8,
    /// アダプテーションフィールド制御。
    pub adaptation_field_control: AdaptationFieldControl,
    /// 連続性指標（4ビット）。
    pub continuity_counter: u8,
    /// アダプテーションフィールド。
    pub adaptation_field: Option<BasicAdaptationField>,
}

impl PacketHeader {
    /// `buf`からヘッダとアダプテーションフィールドのフラグを読み取る。
    ///
    /// 固定位置のバイトを読むだけであり、[`BitReader`]は使わない。
    pub fn decode_basic(buf: &[u8]) -> PacketHeader {
        let b1 = byte_at(buf, 1);
        let b3 = byte_at(buf, 3);
        let adaptation_field_control = AdaptationFieldControl::from_bits(b3 >> 4);

        let adaptation_field = adaptation_field_control.has_adaptation_field().then(|| {
            let length = byte_at(buf, 4);
            BasicAdaptationField {
                length,
                flags: (length > 0).then(|| AdaptationFlags::from_byte(byte_at(buf, 5))),
            }
        });

        PacketHeader {
            sync_byte: byte_at(buf, 0),
            transport_error_indicator: b1 & 0b10000000 != 0,
            payload_unit_start_indicator: b1 & 0b01000000 != 0,
            transport_priority: b1 & 0b00100000 != 0,
            pid: Pid::read(&[b1, byte_at(buf, 2)]),
            transport_scrambling_control: (b3 & 0b11000000) >> 6,
            adaptation_field_control,
            continuity_counter: b3 & 0b00001111,
            adaptation_field,
        }
    }

    /// パケットがペイロードを含むかどうかを返す。
    #[inline]
    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control.has_payload()
    }

    /// パケットが奇数鍵または偶数鍵でスクランブルされているかを返す。
    #[inline]
    pub fn is_scrambled(&self) -> bool {
        self.transport_scrambling_control & 0b10 != 0
    }

    /// アダプテーションフィールドの不連続性インジケーターを返す。
    #[inline]
    pub fn discontinuity_indicator(&self) -> bool {
        self.adaptation_field
            .and_then(|af| af.flags)
            .map_or(false, |flags| flags.discontinuity_indicator)
    }
}

/// PCRおよびOPCR。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ClockReference {
    /// 90kHz単位の基準部（33ビット）。
    pub base: u64,
    /// 27MHz単位の拡張部（9ビット）。
    pub extension: u16,
}

impl ClockReference {
    /// 27MHz単位の値を返す。
    #[inline]
    pub fn value(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    fn read(br: &mut BitReader) -> ClockReference {
        let base = br.uimsbf(33);
        br.skip(6); // reserved
        let extension = br.uimsbf(9) as u16;
        ClockReference { base, extension }
    }

    fn write(&self, bw: &mut BitWriter) {
        // 31ビット単位の書き込みに合わせて上位2ビットと下位31ビットに分ける
        bw.write(2, self.base / 0x80000000);
        bw.write(31, self.base & 0x7FFFFFFF);
        bw.write(6, 0x3F); // reserved
        bw.write(9, self.extension as u64);
    }
}

/// 正当時間窓（legal time window）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ltw {
    /// ltw_valid_flag。
    pub valid: bool,
    /// ltw_offset（15ビット）。
    pub offset: u16,
}

/// シームレススプライス。
///
/// 次のアクセスユニットのDTSは3つのフィールドに分かれて格納される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeamlessSplice {
    /// スプライス種別（4ビット）。
    pub splice_type: u8,
    /// DTS_next_AUの32～30ビット目。
    pub dts_next_au_32_30: u8,
    /// DTS_next_AUの29～15ビット目。
    pub dts_next_au_29_15: u16,
    /// DTS_next_AUの14～0ビット目。
    pub dts_next_au_14_0: u16,
}

impl SeamlessSplice {
    /// 33ビットのDTS_next_AUを返す。
    #[inline]
    pub fn dts_next_au(&self) -> u64 {
        (self.dts_next_au_32_30 as u64) << 30
            | (self.dts_next_au_29_15 as u64) << 15
            | self.dts_next_au_14_0 as u64
    }
}

/// アダプテーションフィールドの拡張。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdaptationFieldExtension {
    /// アダプテーションフィールド拡張長。
    pub length: u8,
    /// 正当時間窓。
    pub ltw: Option<Ltw>,
    /// 区分レート（22ビット）。
    pub piecewise_rate: Option<u32>,
    /// シームレススプライス。
    pub seamless_splice: Option<SeamlessSplice>,
}

impl AdaptationFieldExtension {
    fn read(br: &mut BitReader) -> AdaptationFieldExtension {
        let length = br.uimsbf(8) as u8;
        let ltw_flag = br.read_flag();
        let piecewise_rate_flag = br.read_flag();
        let seamless_splice_flag = br.read_flag();
        br.skip(5); // reserved

        let ltw = ltw_flag.then(|| Ltw {
            valid: br.read_flag(),
            offset: br.uimsbf(15) as u16,
        });
        let piecewise_rate = piecewise_rate_flag.then(|| {
            br.skip(2); // reserved
            br.uimsbf(22) as u32
        });
        let seamless_splice = seamless_splice_flag.then(|| {
            let splice_type = br.bslbf(4) as u8;
            let dts_next_au_32_30 = br.bslbf(3) as u8;
            br.skip(1); // marker_bit
            let dts_next_au_29_15 = br.bslbf(15) as u16;
            br.skip(1); // marker_bit
            let dts_next_au_14_0 = br.bslbf(15) as u16;
            br.skip(1); // marker_bit
            SeamlessSplice {
                splice_type,
                dts_next_au_32_30,
                dts_next_au_29_15,
                dts_next_au_14_0,
            }
        });

        AdaptationFieldExtension {
            length,
            ltw,
            piecewise_rate,
            seamless_splice,
        }
    }

    fn write(&self, bw: &mut BitWriter) {
        let start = bw.position();

        bw.write(8, self.length as u64);
        bw.write_flag(self.ltw.is_some());
        bw.write_flag(self.piecewise_rate.is_some());
        bw.write_flag(self.seamless_splice.is_some());
        bw.write(5, 0x1F); // reserved
        if let Some(ltw) = &self.ltw {
            bw.write_flag(ltw.valid);
            bw.write(15, ltw.offset as u64);
        }
        if let Some(piecewise_rate) = self.piecewise_rate {
            bw.write(2, 0b11); // reserved
            bw.write(22, piecewise_rate as u64);
        }
        if let Some(ss) = &self.seamless_splice {
            bw.write(4, ss.splice_type as u64);
            bw.write(3, ss.dts_next_au_32_30 as u64);
            bw.write(1, 1); // marker_bit
            bw.write(15, ss.dts_next_au_29_15 as u64);
            bw.write(1, 1); // marker_bit
            bw.write(15, ss.dts_next_au_14_0 as u64);
            bw.write(1, 1); // marker_bit
        }

        // 拡張長の残りは予約領域
        let end = start + 8 + ((self.length as usize) << 3);
        if bw.position() < end {
            bw.skip(end - bw.position());
        }
    }
}

/// アダプテーションフィールドのフラグ以降の内容。
///
/// 各フラグに対応するフィールドは`Option`で表し、フラグは`Option`の有無から決まる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdaptationFieldBody<'a> {
    /// 不連続性インジケーター。
    pub discontinuity_indicator: bool,
    /// ランダムアクセスインジケーター。
    pub random_access_indicator: bool,
    /// エレメンタリーストリーム優先度インジケーター。
    pub es_priority_indicator: bool,
    /// PCR。
    pub pcr: Option<ClockReference>,
    /// オリジナルPCR。
    pub opcr: Option<ClockReference>,
    /// スプライスカウントダウン。
    pub splice_countdown: Option<i8>,
    /// プライベートデータ。
    pub private_data: Option<&'a [u8]>,
    /// アダプテーションフィールドの拡張。
    pub extension: Option<AdaptationFieldExtension>,
}

impl<'a> AdaptationFieldBody<'a> {
    /// フィールドの有無からフラグを組み立てる。
    pub fn flags(&self) -> AdaptationFlags {
        AdaptationFlags {
            discontinuity_indicator: self.discontinuity_indicator,
            random_access_indicator: self.random_access_indicator,
            es_priority_indicator: self.es_priority_indicator,
            pcr_flag: self.pcr.is_some(),
            opcr_flag: self.opcr.is_some(),
            splicing_point_flag: self.splice_countdown.is_some(),
            transport_private_data_flag: self.private_data.is_some(),
            extension_flag: self.extension.is_some(),
        }
    }
}

/// TSパケット内のアダプテーションフィールド。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdaptationField<'a> {
    /// アダプテーションフィールド長。
    pub length: u8,
    /// フラグ以降の内容。アダプテーションフィールド長が`0`の場合は存在しない。
    pub body: Option<AdaptationFieldBody<'a>>,
}

impl<'a> AdaptationField<'a> {
    /// アダプテーションフィールド長から始まる`buf`を読み取る。
    pub fn decode(buf: &'a [u8]) -> AdaptationField<'a> {
        let mut br = BitReader::new(buf);

        let length = br.uimsbf(8) as u8;
        if length == 0 {
            return AdaptationField { length, body: None };
        }

        let flags = AdaptationFlags::from_byte(br.bslbf(8) as u8);
        let pcr = flags.pcr_flag.then(|| ClockReference::read(&mut br));
        let opcr = flags.opcr_flag.then(|| ClockReference::read(&mut br));
        let splice_countdown = flags.splicing_point_flag.then(|| br.tcimsbf(8) as i8);
        let private_data = flags.transport_private_data_flag.then(|| {
            let len = br.uimsbf(8) as usize;
            br.read_bytes(len)
        });
        let extension = flags
            .extension_flag
            .then(|| AdaptationFieldExtension::read(&mut br));

        AdaptationField {
            length,
            body: Some(AdaptationFieldBody {
                discontinuity_indicator: flags.discontinuity_indicator,
                random_access_indicator: flags.random_access_indicator,
                es_priority_indicator: flags.es_priority_indicator,
                pcr,
                opcr,
                splice_countdown,
                private_data,
                extension,
            }),
        }
    }

    /// アダプテーションフィールドを書き込み、長さに満たない部分はスタッフィングバイトとして飛ばす。
    fn write(&self, bw: &mut BitWriter) -> Result<(), EncodeError> {
        let start = bw.position();
        bw.write(8, self.length as u64);

        if let Some(body) = &self.body {
            bw.write(8, body.flags().to_byte() as u64);
            if let Some(pcr) = &body.pcr {
                pcr.write(bw);
            }
            if let Some(opcr) = &body.opcr {
                opcr.write(bw);
            }
            if let Some(splice_countdown) = body.splice_countdown {
                bw.write_signed(8, splice_countdown as i64);
            }
            if let Some(private_data) = body.private_data {
                bw.write(8, private_data.len() as u64);
                bw.write_bytes(private_data);
            }
            if let Some(extension) = &body.extension {
                extension.write(bw);
            }
        }

        let end = start + 8 + ((self.length as usize) << 3);
        if bw.position() > end {
            return Err(EncodeError::AdaptationFieldOverflow {
                length: self.length,
                needed: (bw.position() - start - 8 + 7) >> 3,
            });
        }
        bw.skip(end - bw.position());
        Ok(())
    }
}

/// [`TsPacket::encode`]で発生するエラー。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// アダプテーションフィールドの内容がアダプテーションフィールド長に収まらない。
    #[error("adaptation field needs {needed} bytes but its length is {length}")]
    AdaptationFieldOverflow {
        /// アダプテーションフィールド長。
        length: u8,
        /// 内容に必要なバイト数。
        needed: usize,
    },

    /// パケットの内容が188バイトに収まらない。
    ///
    /// 内包する`usize`には必要なバイト数が入る。
    #[error("packet needs {0} bytes")]
    PacketOverflow(usize),
}

/// 全てのフィールドを読み取ったTSパケット。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TsPacket<'a> {
    /// 同期バイト。
    pub sync_byte: u8,
    /// トランスポートエラーインジケーター。
    pub transport_error_indicator: bool,
    /// ペイロードユニット開始インジケーター。
    pub payload_unit_start_indicator: bool,
    /// トランスポート優先度。
    pub transport_priority: bool,
    /// PID。
    pub pid: Pid,
    /// トランスポートスクランブル制御（2ビット）。
    pub transport_scrambling_control: u8,
    /// アダプテーションフィールド制御。
    pub adaptation_field_control: AdaptationFieldControl,
    /// 連続性指標（4ビット）。
    pub continuity_counter: u8,
    /// アダプテーションフィールド。
    pub adaptation_field: Option<AdaptationField<'a>>,
    /// ペイロード。
    pub data: Option<&'a [u8]>,
}

impl<'a> TsPacket<'a> {
    /// `buf`からパケットの全てのフィールドを読み取る。
    pub fn decode(buf: &'a [u8]) -> TsPacket<'a> {
        let mut br = BitReader::new(buf);

        let sync_byte = br.bslbf(8) as u8;
        let transport_error_indicator = br.read_flag();
        let payload_unit_start_indicator = br.read_flag();
        let transport_priority = br.read_flag();
        let pid = Pid::read(&(br.uimsbf(13) as u16).to_be_bytes());
        let transport_scrambling_control = br.bslbf(2) as u8;
        let adaptation_field_control = AdaptationFieldControl::from_bits(br.bslbf(2) as u8);
        let continuity_counter = br.uimsbf(4) as u8;

        let adaptation_field = adaptation_field_control.has_adaptation_field().then(|| {
            let af = AdaptationField::decode(self::adaptation_field(buf).unwrap_or(&[]));
            br.skip(8 + ((af.length as usize) << 3));
            af
        });

        let data = adaptation_field_control
            .has_payload()
            .then(|| clamped(buf, br.byte_position(), PACKET_SIZE));

        TsPacket {
            sync_byte,
            transport_error_indicator,
            payload_unit_start_indicator,
            transport_priority,
            pid,
            transport_scrambling_control,
            adaptation_field_control,
            continuity_counter,
            adaptation_field,
            data,
        }
    }

    /// パケットを188バイトに書き込む。
    ///
    /// 同期バイトは常に`0x47`、トランスポートエラーインジケーターは常に`0`として書き込む。
    /// アダプテーションフィールドの余りとペイロード以降の余りには`0xFF`を詰める。
    /// 予約ビットは`1`とする。
    pub fn encode(&self) -> Result<[u8; PACKET_SIZE], EncodeError> {
        let mut buf = [0xFF; PACKET_SIZE];
        let mut bw = BitWriter::new(&mut buf);

        bw.write(8, SYNC_BYTE as u64);
        bw.write_flag(false);
        bw.write_flag(self.payload_unit_start_indicator);
        bw.write_flag(self.transport_priority);
        bw.write(13, self.pid.get() as u64);
        bw.write(2, self.transport_scrambling_control as u64);
        bw.write(2, self.adaptation_field_control.bits() as u64);
        bw.write(4, self.continuity_counter as u64);

        if self.adaptation_field_control.has_adaptation_field() {
            match &self.adaptation_field {
                Some(af) => af.write(&mut bw)?,
                None => bw.write(8, 0),
            }
        }

        if self.adaptation_field_control.has_payload() {
            if let Some(data) = self.data {
                bw.write_bytes(data);
            }
        }

        let size = (bw.position() + 7) >> 3;
        if size > PACKET_SIZE {
            return Err(EncodeError::PacketOverflow(size));
        }
        Ok(buf)
    }
}

/// ペイロードの開始位置を返す。
#[inline]
fn payload_offset(buf: &[u8]) -> Option<usize> {
    let afc = AdaptationFieldControl::from_bits(byte_at(buf, 3) >> 4);
    if !afc.has_payload() {
        None
    } else if afc.has_adaptation_field() {
        Some(5 + byte_at(buf, 4) as usize)
    } else {
        Some(4)
    }
}

/// ペイロードがPESパケットの開始であるかどうかを返す。
///
/// ペイロードを含まない場合は`None`を返す。
/// パケット開始コードプレフィックス（`00 00 01`）で始まるかだけを見る。
pub fn is_pes(buf: &[u8]) -> Option<bool> {
    let offset = payload_offset(buf)?;
    Some(clamped(buf, offset, offset + 3) == [0x00, 0x00, 0x01])
}

/// アダプテーションフィールド長から始まるアダプテーションフィールドを切り出す。
///
/// アダプテーションフィールドを含まない場合は`None`を返す。
pub fn adaptation_field(buf: &[u8]) -> Option<&[u8]> {
    let afc = AdaptationFieldControl::from_bits(byte_at(buf, 3) >> 4);
    afc.has_adaptation_field()
        .then(|| clamped(buf, 4, 5 + byte_at(buf, 4) as usize))
}

/// ペイロードを切り出す。
///
/// ペイロードを含まない場合は`None`を返す。
pub fn payload(buf: &[u8]) -> Option<&[u8]> {
    payload_offset(buf).map(|offset| clamped(buf, offset, PACKET_SIZE))
}

/// MPEG2-TSのパケット。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Packet(pub [u8; PACKET_SIZE]);

impl Packet {
    /// `r`からTSパケットを順次読み込むイテレーターを生成する。
    ///
    /// # サンプル
    ///
    /// ```
    /// # fn main() -> std::io::Result<()> {
    /// # let file = &mut (&[] as &[u8]);
    /// for packet in aribts::Packet::iter(file) {
    ///     let packet = packet?;
    ///
    ///     // 同期バイトは常に正しい
    ///     assert_eq!(packet.header().sync_byte, 0x47);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[inline]
    #[must_use]
    pub fn iter<R: Read>(r: R) -> PacketIter<R> {
        PacketIter { r }
    }

    /// `r`からTSパケットを読み込む。
    ///
    /// 原則として188バイトずつ読み込むが、先頭が同期バイトでない場合は同期バイトまで読み飛ばす。
    /// 終端に達した場合は`None`を返す。
    pub fn read<R: Read>(r: R) -> io::Result<Option<Packet>> {
        fn read_inner<R: Read>(mut r: R) -> io::Result<Packet> {
            let mut packet = Packet([0; PACKET_SIZE]);
            r.read_exact(&mut packet.0)?;
            if packet.0[0] == SYNC_BYTE {
                return Ok(packet);
            }

            // 同期バイト待ち
            let pos = loop {
                if let Some(pos) = memchr::memchr(SYNC_BYTE, &packet.0) {
                    break pos;
                }
                r.read_exact(&mut packet.0)?;
            };

            log::trace!("resynchronized after skipping {} bytes", pos);
            packet.0.copy_within(pos.., 0);
            r.read_exact(&mut packet.0[PACKET_SIZE - pos..])?;
            Ok(packet)
        }

        match read_inner(r) {
            Ok(packet) => Ok(Some(packet)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// ヘッダを読み取る。
    #[inline]
    pub fn header(&self) -> PacketHeader {
        PacketHeader::decode_basic(&self.0)
    }

    /// 全てのフィールドを読み取る。
    #[inline]
    pub fn decode(&self) -> TsPacket {
        TsPacket::decode(&self.0)
    }
}

impl AsRef<[u8]> for Packet {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let header = self.header();
        f.debug_struct("Packet")
            .field("pid", &header.pid)
            .field("payload_unit_start_indicator", &header.payload_unit_start_indicator)
            .field("adaptation_field_control", &header.adaptation_field_control)
            .field("continuity_counter", &header.continuity_counter)
            .finish_non_exhaustive()
    }
}

/// [`Packet::iter`]から返される。TSパケットを順次読み込むイテレーター。
#[derive(Debug)]
pub struct PacketIter<R> {
    r: R,
}

impl<R: Read> Iterator for PacketIter<R> {
    type Item = io::Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        Packet::read(&mut self.r).transpose()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // https://youzaka.hatenablog.com/entry/2011/11/09/001615
    pub(crate) const PACKET_1: Packet = Packet(hex_literal::hex!(
        "
47 40 12 18 00 4F F0 CC 01 26 FF 01 01 43 11 00
04 01 4F 44 4D DA 15 17 25 00 00 05 00 10 B1 4D
78 6A 70 6E 10 AA A6 C1 CE 3F 40 4D 4D 1B 24 2A
3B 1B 7D FA D6 63 30 61 42 58 A8 CE 35 28 40 61
21 22 32 46 49 7E F2 3C 7D 47 3C B9 EB 41 30 CB
E4 EB B3 C8 C8 CF 1B 7E BF 1B 7D E4 E9 BA CB 3C
7D 47 3C B9 EB C8 33 32 43 6E AC 49 7E F2 39 53
E9 B7 C6 B7 DE A6 B3 C8 E2 21 26 21 26 21 26 40
35 B7 A4 32 46 49 7E 3C 7D 47 3C 4A 7D 4B 21 F2
3E 52 32 70 B7 DE B9 21 23 50 06 F1 03 00 6A 70
6E 54 06 22 FF 2F FF 84 FF C1 02 A4 01 C4 11 F2
03 10 0F FF 6F 6A 70 6E 25 39 25 46
"
    ));
    const PACKET_2: Packet = Packet(hex_literal::hex!(
        "
47 01 40 37 3F 00 FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF 34 66 D8 08 6A E7 24 A1 28 F9 07 89
57 01 65 9A 48 3B 9E AC 90 24 AB C6 0F 93 94 58
DD 91 F2 4E 4A 1C F7 01 16 B2 CA 26 36 E5 A4 9A
30 24 0C 38 EC 78 55 6C 80 F1 A1 E0 72 14 41 32
D9 82 A9 48 2C A4 16 53 1F 53 03 3A 84 8C 1B FF
91 8D F7 54 C1 D4 C7 CE 72 A6 AA 45 EA 62 6A 61
65 75 20 F2 B9 48 1C A6 46 52 1B 39 C9 A4 F0 C1
A8 19 92 72 D6 38 D8 00 00 00 00 00
"
    ));
    const PACKET_3: Packet = Packet(hex_literal::hex!(
        "
47 01 11 20 B7 10 D2 2D 74 82 80 F9 FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF
    "
    ));

    // 予約ビットが全て1のPCR
    const PACKET_4: Packet = Packet(hex_literal::hex!(
        "
47 01 11 21 B7 10 D2 2D 74 82 FE F9 FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF FF
FF FF FF FF FF FF FF FF FF FF FF FF
    "
    ));

    #[test]
    fn test_decode_basic() {
        let h = PACKET_1.header();
        assert_eq!(h.sync_byte, SYNC_BYTE);
        assert!(!h.transport_error_indicator);
        assert!(h.payload_unit_start_indicator);
        assert!(!h.transport_priority);
        assert_eq!(h.pid, Pid::EIT);
        assert_eq!(h.transport_scrambling_control, 0b00);
        assert!(!h.is_scrambled());
        assert_eq!(h.adaptation_field_control, AdaptationFieldControl::PayloadOnly);
        assert_eq!(h.continuity_counter, 8);
        assert_eq!(h.adaptation_field, None);
        assert!(h.has_payload());

        let h = PACKET_2.header();
        assert_eq!(h.pid, Pid::new(0x0140));
        assert_eq!(h.adaptation_field_control, AdaptationFieldControl::Both);
        assert_eq!(h.continuity_counter, 7);
        assert_matches!(
            h.adaptation_field,
            Some(BasicAdaptationField {
                length: 63,
                flags: Some(AdaptationFlags {
                    discontinuity_indicator: false,
                    pcr_flag: false,
                    ..
                }),
            })
        );

        let h = PACKET_3.header();
        assert_eq!(h.pid, Pid::new(0x0111));
        assert_eq!(h.adaptation_field_control, AdaptationFieldControl::AdaptationOnly);
        assert!(!h.has_payload());
        assert_matches!(
            h.adaptation_field,
            Some(BasicAdaptationField {
                length: 183,
                flags: Some(AdaptationFlags { pcr_flag: true, .. }),
            })
        );
    }

    #[test]
    fn test_decode_basic_truncated() {
        let h = PacketHeader::decode_basic(&[SYNC_BYTE, 0x5F]);
        assert_eq!(h.pid, Pid::new(0x1F00));
        assert!(h.payload_unit_start_indicator);
        assert_eq!(h.adaptation_field_control, AdaptationFieldControl::Reserved);
        assert_eq!(h.continuity_counter, 0);

        // アダプテーションフィールド長0ではフラグが存在しない
        let h = PacketHeader::decode_basic(&[SYNC_BYTE, 0x00, 0x00, 0x30, 0x00]);
        assert_eq!(
            h.adaptation_field,
            Some(BasicAdaptationField {
                length: 0,
                flags: None,
            })
        );
        assert!(!h.discontinuity_indicator());

        let h = PacketHeader::decode_basic(&[]);
        assert_eq!(h.sync_byte, 0);
        assert_eq!(h.pid, Pid::PAT);
    }

    #[test]
    fn test_decode() {
        let p = PACKET_1.decode();
        assert_eq!(p.pid, Pid::EIT);
        assert_eq!(p.adaptation_field, None);
        assert_eq!(p.data, Some(&PACKET_1.0[4..]));

        let p = PACKET_2.decode();
        let af = p.adaptation_field.as_ref().unwrap();
        assert_eq!(af.length, 63);
        let body = af.body.as_ref().unwrap();
        assert!(!body.discontinuity_indicator);
        assert_eq!(body.pcr, None);
        assert_eq!(body.private_data, None);
        assert_eq!(p.data, Some(&PACKET_2.0[68..]));

        let p = PACKET_3.decode();
        let body = p.adaptation_field.as_ref().unwrap().body.as_ref().unwrap();
        assert_eq!(
            body.pcr,
            Some(ClockReference {
                base: 7052388613,
                extension: 249,
            })
        );
        assert_eq!(body.opcr, None);
        assert_eq!(p.data, None);
    }

    #[test]
    fn test_round_trip() {
        for packet in [PACKET_1, PACKET_2, PACKET_4] {
            assert_eq!(packet.decode().encode(), Ok(packet.0));
        }

        let p = PACKET_4.decode();
        assert_eq!(p.adaptation_field, PACKET_3.decode().adaptation_field);

        // 予約ビットは1で書き込まれる
        let mut raw = PACKET_3.0;
        raw[10] = 0xFE;
        assert_eq!(PACKET_3.decode().encode(), Ok(raw));
    }

    #[test]
    fn test_encode_forces_sync_and_error_indicator() {
        let mut raw = PACKET_1.0;
        raw[0] = 0x00;
        raw[1] |= 0b10000000;
        let p = TsPacket::decode(&raw);
        assert_eq!(p.sync_byte, 0x00);
        assert!(p.transport_error_indicator);
        assert_eq!(p.encode(), Ok(PACKET_1.0));
    }

    #[test]
    fn test_full_adaptation_field() {
        let private_data = [0xDE, 0xAD, 0xBE];
        let payload = [0x55; 143];
        let packet = TsPacket {
            sync_byte: SYNC_BYTE,
            transport_error_indicator: false,
            payload_unit_start_indicator: true,
            transport_priority: true,
            pid: Pid::new(0x0100),
            transport_scrambling_control: 0b00,
            adaptation_field_control: AdaptationFieldControl::Both,
            continuity_counter: 0x0A,
            adaptation_field: Some(AdaptationField {
                length: 40,
                body: Some(AdaptationFieldBody {
                    discontinuity_indicator: true,
                    random_access_indicator: true,
                    es_priority_indicator: false,
                    pcr: Some(ClockReference {
                        base: 0x1_FFFF_FFFF,
                        extension: 0x1FF,
                    }),
                    opcr: Some(ClockReference {
                        base: 0x0_8000_0001,
                        extension: 3,
                    }),
                    splice_countdown: Some(-3),
                    private_data: Some(&private_data),
                    extension: Some(AdaptationFieldExtension {
                        length: 11,
                        ltw: Some(Ltw {
                            valid: true,
                            offset: 0x7ABC,
                        }),
                        piecewise_rate: Some(0x3F_FFFE),
                        seamless_splice: Some(SeamlessSplice {
                            splice_type: 0b1010,
                            dts_next_au_32_30: 0b101,
                            dts_next_au_29_15: 0x5555,
                            dts_next_au_14_0: 0x2AAA,
                        }),
                    }),
                }),
            }),
            data: Some(&payload),
        };

        let raw = packet.encode().unwrap();
        assert_eq!(&raw[..4], &[0x47, 0x61, 0x00, 0x3A]);
        assert_eq!(raw[4], 40);
        assert_eq!(raw[5], 0b1101_1111);
        assert_eq!(&raw[6..12], &[0xFF; 6]);
        assert_eq!(&raw[12..18], &[0x40, 0x00, 0x00, 0x00, 0xFE, 0x03]);
        assert_eq!(raw[23], 11);
        assert_eq!(raw[24], 0xFF);
        assert_eq!(&raw[27..30], &[0xFF, 0xFF, 0xFE]);
        // フラグからプライベートデータまで18バイト、拡張12バイト、残りはスタッフィング
        assert_eq!(&raw[35..45], &[0xFF; 10]);
        assert_eq!(&raw[45..], &payload[..]);

        let decoded = TsPacket::decode(&raw);
        assert_eq!(decoded, packet);
        let ss = decoded
            .adaptation_field
            .as_ref()
            .and_then(|af| af.body.as_ref())
            .and_then(|body| body.extension)
            .and_then(|ext| ext.seamless_splice)
            .unwrap();
        assert_eq!(ss.dts_next_au(), 0b101 << 30 | 0x5555 << 15 | 0x2AAA);
        assert_eq!(decoded.encode(), Ok(raw));
    }

    #[test]
    fn test_encode_overflow() {
        let payload = [0; 185];
        let mut packet = TsPacket {
            sync_byte: SYNC_BYTE,
            transport_error_indicator: false,
            payload_unit_start_indicator: false,
            transport_priority: false,
            pid: Pid::NULL,
            transport_scrambling_control: 0,
            adaptation_field_control: AdaptationFieldControl::PayloadOnly,
            continuity_counter: 0,
            adaptation_field: None,
            data: Some(&payload),
        };
        assert_eq!(packet.encode(), Err(EncodeError::PacketOverflow(189)));

        packet.adaptation_field_control = AdaptationFieldControl::AdaptationOnly;
        packet.adaptation_field = Some(AdaptationField {
            length: 6,
            body: Some(AdaptationFieldBody {
                discontinuity_indicator: false,
                random_access_indicator: false,
                es_priority_indicator: false,
                pcr: Some(ClockReference::default()),
                opcr: None,
                splice_countdown: None,
                private_data: None,
                extension: None,
            }),
        });
        assert_eq!(
            packet.encode(),
            Err(EncodeError::AdaptationFieldOverflow {
                length: 6,
                needed: 7,
            })
        );
    }

    #[test]
    fn test_static_helpers() {
        assert_eq!(is_pes(&PACKET_1.0), Some(false));
        assert_eq!(adaptation_field(&PACKET_1.0), None);
        assert_eq!(payload(&PACKET_1.0), Some(&PACKET_1.0[4..]));

        assert_eq!(adaptation_field(&PACKET_2.0), Some(&PACKET_2.0[4..68]));
        assert_eq!(payload(&PACKET_2.0), Some(&PACKET_2.0[68..]));
        assert_eq!(is_pes(&PACKET_2.0), Some(false));

        assert_eq!(is_pes(&PACKET_3.0), None);
        assert_eq!(payload(&PACKET_3.0), None);
        assert_eq!(adaptation_field(&PACKET_3.0), Some(&PACKET_3.0[4..]));

        // アダプテーションフィールドの直後にPES開始コード
        let mut raw = [0xFF; PACKET_SIZE];
        raw[..6].copy_from_slice(&[SYNC_BYTE, 0x41, 0x00, 0x30, 0x01, 0x00]);
        raw[6..9].copy_from_slice(&[0x00, 0x00, 0x01]);
        assert_eq!(is_pes(&raw), Some(true));
        assert_eq!(payload(&raw).map(|p| &p[..3]), Some(&[0x00, 0x00, 0x01][..]));

        // 範囲外を指すアダプテーションフィールド長
        let raw = [SYNC_BYTE, 0x00, 0x00, 0x30, 0xFF, 0x00];
        assert_eq!(is_pes(&raw), Some(false));
        assert_eq!(payload(&raw), Some(&[] as &[u8]));
        assert_eq!(adaptation_field(&raw), Some(&raw[4..]));
    }

    #[test]
    fn test_packet_read() {
        for packet in [PACKET_1, PACKET_2, PACKET_3] {
            let pkt: &[u8] = &packet.0;

            assert_eq!(Packet::read(&mut &pkt[..0]).unwrap(), None);
            assert_eq!(Packet::read(&mut &pkt[1..]).unwrap(), None);
            assert_eq!(Packet::read(&mut &*pkt).unwrap(), Some(packet.clone()));
            assert_eq!(
                Packet::read(&mut &*[&[0; 1], pkt].concat()).unwrap(),
                Some(packet.clone()),
            );
            assert_eq!(
                Packet::read(&mut &*[&[0; 200], pkt].concat()).unwrap(),
                Some(packet.clone()),
            );
        }
    }

    #[test]
    fn test_packet_read_err() {
        struct ReadErr(io::ErrorKind);
        impl Read for ReadErr {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(self.0.into())
            }
        }

        assert_matches!(
            Packet::read(ReadErr(io::ErrorKind::UnexpectedEof)),
            Ok(None)
        );
        assert_matches!(
            Packet::read(ReadErr(io::ErrorKind::BrokenPipe)),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_packet_iter() {
        let data = [PACKET_1.0, PACKET_2.0, PACKET_3.0].concat();
        let mut iter = Packet::iter(&*data);
        assert_eq!(iter.next().unwrap().unwrap(), PACKET_1);
        assert_eq!(iter.next().unwrap().unwrap(), PACKET_2);
        assert_eq!(iter.next().unwrap().unwrap(), PACKET_3);
        assert_matches!(iter.next(), None);
    }
}
