//! EIT（Event Information Table）。

use std::ops::RangeInclusive;

use crate::bit::BitReader;

/// 各サービスに含まれるイベント。
///
/// 日時や記述子は解釈せず、バイト列のまま保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EitEvent<'a> {
    /// イベント識別。
    pub event_id: u16,
    /// 開始時間（MJDとBCDによる5バイト）。
    pub start_time: &'a [u8],
    /// 継続時間（BCDによる3バイト）。
    pub duration: &'a [u8],
    /// 進行状態。
    pub running_status: u8,
    /// スクランブル。
    pub free_ca_mode: bool,
    /// 記述子ループ長。
    pub descriptors_loop_length: u16,
    /// 記述子ループのバイト列。
    pub descriptors: &'a [u8],
}

/// EIT（Event Information Table）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eit<'a> {
    /// テーブル識別。
    pub table_id: u8,
    /// セクションシンタクス指示。
    pub section_syntax_indicator: bool,
    /// セクション長。
    pub section_length: u16,
    /// サービス識別。
    pub service_id: u16,
    /// バージョン番号。
    pub version_number: u8,
    /// カレントネクスト指示。
    pub current_next_indicator: bool,
    /// セクション番号。
    pub section_number: u8,
    /// 最終セクション番号。
    pub last_section_number: u8,
    /// トランスポートストリーム識別。
    pub transport_stream_id: u16,
    /// オリジナルネットワーク識別。
    pub original_network_id: u16,
    /// セグメント最終セクション番号。
    pub segment_last_section_number: u8,
    /// 最終テーブル識別。
    pub last_table_id: u8,
    /// イベントを格納する配列。
    pub events: Vec<EitEvent<'a>>,
    /// CRC。
    pub crc32: u32,
}

impl<'a> Eit<'a> {
    /// 自TSにおけるイベント［現在／次］を格納するEITのテーブルID。
    pub const TABLE_ID_PF_ACTUAL: u8 = 0x4E;
    /// 他TSにおけるイベント［現在／次］を格納するEITのテーブルID。
    pub const TABLE_ID_PF_OTHER: u8 = 0x4F;
    /// 自TSにおけるイベント［スケジュール］を格納するEITのテーブルID。
    pub const TABLE_ID_SCHEDULE_ACTUAL: RangeInclusive<u8> = 0x50..=0x5F;
    /// 他TSにおけるイベント［スケジュール］を格納するEITのテーブルID。
    pub const TABLE_ID_SCHEDULE_OTHER: RangeInclusive<u8> = 0x60..=0x6F;

    /// セクション全体のバイト列`section`から`Eit`を読み取る。
    ///
    /// CRC32が一致しない場合は`None`を返す。
    pub fn read(section: &'a [u8]) -> Option<Eit<'a>> {
        if section.len() < 4 || !crate::crc32::is_valid(section) {
            log::debug!("invalid Eit::crc32");
            return None;
        }

        let mut reader = BitReader::new(section);
        let table_id = reader.uimsbf(8) as u8;
        let section_syntax_indicator = reader.read_flag();
        reader.skip(1); // reserved_future_use
        reader.skip(2); // reserved
        let section_length = reader.uimsbf(12) as u16;
        let service_id = reader.uimsbf(16) as u16;
        reader.skip(2); // reserved
        let version_number = reader.uimsbf(5) as u8;
        let current_next_indicator = reader.read_flag();
        let section_number = reader.uimsbf(8) as u8;
        let last_section_number = reader.uimsbf(8) as u8;
        let transport_stream_id = reader.uimsbf(16) as u16;
        let original_network_id = reader.uimsbf(16) as u16;
        let segment_last_section_number = reader.uimsbf(8) as u8;
        let last_table_id = reader.uimsbf(8) as u8;

        // イベントループはCRCの手前まで
        let end = std::cmp::min(3 + section_length as usize, section.len()).saturating_sub(4);
        let mut events = Vec::new();
        while reader.byte_position() < end {
            let event_id = reader.uimsbf(16) as u16;
            let start_time = reader.read_bytes(5);
            let duration = reader.read_bytes(3);
            let running_status = reader.uimsbf(3) as u8;
            let free_ca_mode = reader.read_flag();
            let descriptors_loop_length = reader.uimsbf(12) as u16;
            let descriptors = reader.read_bytes(descriptors_loop_length as usize);

            events.push(EitEvent {
                event_id,
                start_time,
                duration,
                running_status,
                free_ca_mode,
                descriptors_loop_length,
                descriptors,
            });
        }

        let crc32 = reader.rpchof(32) as u32;

        Some(Eit {
            table_id,
            section_syntax_indicator,
            section_length,
            service_id,
            version_number,
            current_next_indicator,
            section_number,
            last_section_number,
            transport_stream_id,
            original_network_id,
            segment_last_section_number,
            last_table_id,
            events,
            crc32,
        })
    }

    /// 現在／次のイベントを格納するEITかどうかを返す。
    #[inline]
    pub fn is_present_following(&self) -> bool {
        matches!(
            self.table_id,
            Self::TABLE_ID_PF_ACTUAL | Self::TABLE_ID_PF_OTHER
        )
    }

    /// 自TSのイベントを格納するEITかどうかを返す。
    #[inline]
    pub fn is_actual(&self) -> bool {
        self.table_id == Self::TABLE_ID_PF_ACTUAL
            || Self::TABLE_ID_SCHEDULE_ACTUAL.contains(&self.table_id)
    }
}
