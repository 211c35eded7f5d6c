//! MPEG-2 Systemsで規定されるテーブルの定義。

use std::num::NonZeroU16;

use crate::pid::Pid;
use crate::psi::PsiSection;
use crate::utils::BytesExt;

use super::read_descriptor_loop;

/// PMTのあるPIDの定義。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatProgram {
    /// 放送番組番号識別。
    pub program_number: NonZeroU16,
    /// PMTのPID。
    pub program_map_pid: Pid,
}

/// PAT（Program Association Table）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    /// トランスポートストリーム識別。
    pub transport_stream_id: u16,
    /// バージョン番号。
    pub version_number: u8,
    /// NITのPID。放送番組番号`0`がない場合は`None`。
    pub network_pid: Option<Pid>,
    /// PMTのPIDを格納する配列。
    pub programs: Vec<PatProgram>,
}

impl Pat {
    /// PATのテーブルID。
    pub const TABLE_ID: u8 = 0x00;

    /// `psi`から`Pat`を読み取る。
    pub fn read(psi: &PsiSection) -> Option<Pat> {
        if psi.table_id != Self::TABLE_ID {
            log::debug!("invalid Pat::table_id");
            return None;
        }
        let Some(syntax) = psi.syntax.as_ref() else {
            log::debug!("invalid Pat::syntax");
            return None;
        };

        let mut network_pid = None;
        let mut programs = Vec::new();
        for chunk in psi.data.chunks_exact(4) {
            let pid = Pid::read(&chunk[2..=3]);
            match NonZeroU16::new(chunk[0..=1].read_be_16()) {
                Some(program_number) => programs.push(PatProgram {
                    program_number,
                    program_map_pid: pid,
                }),
                None => network_pid = Some(pid),
            }
        }

        Some(Pat {
            transport_stream_id: syntax.table_id_extension,
            version_number: syntax.version_number,
            network_pid,
            programs,
        })
    }

    /// `program_number`のPMTがあるPIDを返す。
    pub fn pmt_pid(&self, program_number: u16) -> Option<Pid> {
        self.programs
            .iter()
            .find(|p| p.program_number.get() == program_number)
            .map(|p| p.program_map_pid)
    }
}

/// 各サービスを構成するストリームの定義。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream<'a> {
    /// ストリーム形式種別。
    pub stream_type: u8,
    /// エレメンタリーPID。
    pub elementary_pid: Pid,
    /// 記述子ループのバイト列。
    pub es_info: &'a [u8],
}

/// PMT（Program Map Table）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt<'a> {
    /// 放送番組番号識別。
    pub program_number: u16,
    /// バージョン番号。
    pub version_number: u8,
    /// PCRのPID。
    pub pcr_pid: Pid,
    /// 番組情報の記述子ループのバイト列。
    pub program_info: &'a [u8],
    /// ストリームを格納する配列。
    pub streams: Vec<PmtStream<'a>>,
}

impl<'a> Pmt<'a> {
    /// PMTのテーブルID。
    pub const TABLE_ID: u8 = 0x02;

    /// `psi`から`Pmt`を読み取る。
    pub fn read(psi: &PsiSection<'a>) -> Option<Pmt<'a>> {
        if psi.table_id != Self::TABLE_ID {
            log::debug!("invalid Pmt::table_id");
            return None;
        }
        let Some(syntax) = psi.syntax.as_ref() else {
            log::debug!("invalid Pmt::syntax");
            return None;
        };

        let data = psi.data;
        if data.len() < 4 {
            log::debug!("invalid Pmt");
            return None;
        }

        let pcr_pid = Pid::read(&data[0..=1]);
        let Some((program_info, mut data)) = read_descriptor_loop(&data[2..]) else {
            log::debug!("invalid Pmt::program_info");
            return None;
        };

        let mut streams = Vec::new();
        while !data.is_empty() {
            if data.len() < 5 {
                log::debug!("invalid PmtStream");
                return None;
            }

            let stream_type = data[0];
            let elementary_pid = Pid::read(&data[1..=2]);
            let Some((es_info, rem)) = read_descriptor_loop(&data[3..]) else {
                log::debug!("invalid PmtStream::es_info");
                return None;
            };
            data = rem;

            streams.push(PmtStream {
                stream_type,
                elementary_pid,
                es_info,
            });
        }

        Some(Pmt {
            program_number: syntax.table_id_extension,
            version_number: syntax.version_number,
            pcr_pid,
            program_info,
            streams,
        })
    }
}
