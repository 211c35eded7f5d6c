//! MPEG2-TSのパケットを分離するためのモジュール。
//!
//! [`Demuxer`]はPIDごとに連続性指標を検査してパケットの欠落や重複を数え、
//! 複数のパケットにまたがるセクションを組み立てて[`Handler`]に通知する。

use std::borrow::Cow;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::packet::{self, PacketHeader, PACKET_SIZE};
use crate::pid::Pid;
use crate::psi::{self, SectionBuffer, STUFFING_TABLE_ID};
use crate::table::{Channel, ChannelSet, Registry, Table};
use crate::utils::clamped;

/// [`Demuxer`]に渡すハンドラーで、分離の結果を受け取るために各メソッドが呼ばれる。
///
/// 各メソッドは対応する[`Channel`]を購読している場合にのみ呼ばれる。
pub trait Handler {
    /// ハンドラー初期化時に呼ばれ、購読する種別の集合を返す。
    ///
    /// 既定では全ての種別を購読する。
    fn on_setup(&mut self) -> ChannelSet {
        ChannelSet::all()
    }

    /// パケットの欠落を検出した際に呼ばれる。
    ///
    /// `counter`はパケットの連続性指標、`expected`は本来期待された連続性指標である。
    fn on_drop(&mut self, pid: Pid, counter: u8, expected: u8) {
        let _ = (pid, counter, expected);
    }

    /// スクランブルされたパケットを受け取った際に呼ばれる。
    fn on_scrambling(&mut self, pid: Pid) {
        let _ = pid;
    }

    /// セクションをテーブルとしてデコードした際に呼ばれる。
    fn on_table(&mut self, pid: Pid, table: &Table) {
        let _ = (pid, table);
    }
}

impl<T: Handler + ?Sized> Handler for &mut T {
    #[inline]
    fn on_setup(&mut self) -> ChannelSet {
        (**self).on_setup()
    }

    #[inline]
    fn on_drop(&mut self, pid: Pid, counter: u8, expected: u8) {
        (**self).on_drop(pid, counter, expected)
    }

    #[inline]
    fn on_scrambling(&mut self, pid: Pid) {
        (**self).on_scrambling(pid)
    }

    #[inline]
    fn on_table(&mut self, pid: Pid, table: &Table) {
        (**self).on_table(pid, table)
    }
}

/// PIDに流れるペイロードの種類。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// 不明。
    #[default]
    Unknown = 0,
    /// PESパケット。
    Pes = 1,
    /// PSI/SIセクション。
    Psi = 2,
}

/// PIDごとの統計。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PidInfo {
    /// 受け取ったパケット数。
    pub packet: u64,
    /// 検出した欠落の数。
    pub drop: u64,
    /// スクランブルされたパケット数。
    pub scrambling: u64,
}

/// PIDごとの分離状態。
#[derive(Debug, Clone, Default)]
pub struct PidState {
    /// 受け取ったパケット数。
    pub packet: u64,
    /// 直前の連続性指標。不連続の直後など、検査する基準がなければ`None`。
    pub continuity: Option<u8>,
    /// 同じ連続性指標が連続した回数。
    pub duplication: u32,
    /// 検出した欠落の数。
    pub drop: u64,
    /// スクランブルされたパケット数。
    pub scrambling: u64,
    /// ペイロードの種類。
    pub payload_type: PayloadType,
    /// 組み立て中のセクション。
    pub buffer: SectionBuffer,
}

impl PidState {
    /// 空の`PidState`を生成する。
    #[inline]
    pub fn new() -> PidState {
        PidState::default()
    }

    /// 統計を返す。
    #[inline]
    pub fn info(&self) -> PidInfo {
        PidInfo {
            packet: self.packet,
            drop: self.drop,
            scrambling: self.scrambling,
        }
    }

    /// 連続性指標`counter`を検査し、欠落していれば期待された値を返す。
    fn check_continuity(&mut self, counter: u8) -> Option<u8> {
        let previous = self.continuity?;
        let expected = (previous + 1) & 0x0F;
        let ok = if counter == previous {
            self.duplication = self.duplication.saturating_add(1);
            self.duplication <= 1
        } else {
            self.duplication = 0;
            counter == expected
        };
        (!ok).then_some(expected)
    }
}

/// 1パケットで完成したセクション。
type Sections<'p> = SmallVec<[Cow<'p, [u8]>; 4]>;

/// TSパケットを分離する。
///
/// # サンプル
///
/// ```
/// use aribts::demux::{Demuxer, Handler};
/// use aribts::table::{Channel, ChannelSet};
/// use aribts::Pid;
///
/// struct Drops(Vec<(Pid, u8, u8)>);
///
/// impl Handler for Drops {
///     fn on_setup(&mut self) -> ChannelSet {
///         ChannelSet::from(Channel::Drop)
///     }
///
///     fn on_drop(&mut self, pid: Pid, counter: u8, expected: u8) {
///         self.0.push((pid, counter, expected));
///     }
/// }
///
/// let mut packet = [0xFF; 188];
/// packet[..4].copy_from_slice(&[0x47, 0x01, 0x00, 0x15]);
/// let mut demuxer = Demuxer::new(Drops(Vec::new()));
/// demuxer.feed(&packet);
/// packet[3] = 0x17;
/// demuxer.feed(&packet);
///
/// assert_eq!(demuxer.handler().0, [(Pid::new(0x0100), 7, 6)]);
/// assert_eq!(demuxer.pid_state(Pid::new(0x0100)).unwrap().drop, 1);
/// ```
pub struct Demuxer<H> {
    handler: H,
    registry: Registry,
    channels: ChannelSet,
    pids: IndexMap<Pid, PidState, FxBuildHasher>,
}

impl<H: Handler> Demuxer<H> {
    /// 既定のデコーダで`Demuxer`を生成する。
    #[inline]
    pub fn new(handler: H) -> Demuxer<H> {
        Demuxer::with_registry(handler, Registry::default())
    }

    /// デコーダを`registry`で置き換えて`Demuxer`を生成する。
    pub fn with_registry(mut handler: H, registry: Registry) -> Demuxer<H> {
        let channels = handler.on_setup();
        Demuxer {
            handler,
            registry,
            channels,
            pids: IndexMap::default(),
        }
    }

    /// 内包するハンドラーを参照で返す。
    #[inline]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// 内包するハンドラーを可変参照で返す。
    #[inline]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// `Demuxer`を消費して内包するハンドラーを返す。
    #[inline]
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// 購読している種別の集合を返す。
    #[inline]
    pub fn channels(&self) -> ChannelSet {
        self.channels
    }

    /// `channel`を購読する。
    #[inline]
    pub fn subscribe(&mut self, channel: Channel) {
        self.channels.insert(channel);
    }

    /// `channel`の購読をやめる。
    #[inline]
    pub fn unsubscribe(&mut self, channel: Channel) {
        self.channels.remove(channel);
    }

    /// `pid`の分離状態を返す。
    #[inline]
    pub fn pid_state(&self, pid: Pid) -> Option<&PidState> {
        self.pids.get(&pid)
    }

    /// PIDごとの統計を、PIDを最初に受け取った順に列挙する。
    pub fn info(&self) -> impl Iterator<Item = (Pid, PidInfo)> + '_ {
        self.pids.iter().map(|(&pid, state)| (pid, state.info()))
    }

    /// 全てのPIDの分離状態を破棄する。
    #[inline]
    pub fn reset(&mut self) {
        self.pids.clear();
    }

    /// 連続したTSパケットからなる`data`を188バイトずつ処理する。
    ///
    /// 末尾の188バイトに満たない部分もそのまま1パケットとして処理する。
    pub fn write(&mut self, data: &[u8]) {
        for packet in data.chunks(PACKET_SIZE) {
            self.feed(packet);
        }
    }

    /// TSパケット1つを処理する。
    ///
    /// `packet`が188バイトに満たない場合、欠けた部分は`0`として扱う。
    pub fn feed(&mut self, packet: &[u8]) {
        let header = PacketHeader::decode_basic(packet);
        if header.transport_error_indicator {
            return;
        }

        let pid = header.pid;
        let state = self.pids.entry(pid).or_default();
        state.packet += 1;

        if !header.has_payload() {
            return;
        }

        if header.discontinuity_indicator() {
            state.continuity = None;
        }

        let counter = header.continuity_counter;
        if pid != Pid::NULL {
            if let Some(expected) = state.check_continuity(counter) {
                log::debug!(
                    "continuity error: {:?} (counter={}, expected={})",
                    pid,
                    counter,
                    expected
                );
                state.drop += 1;
                state.payload_type = PayloadType::Unknown;
                state.buffer.reset();
                if self.channels.contains(Channel::Drop) {
                    self.handler.on_drop(pid, counter, expected);
                }
            }
        }
        state.continuity = Some(counter);

        if header.is_scrambled() {
            state.scrambling += 1;
            if self.channels.contains(Channel::Scrambling) {
                self.handler.on_scrambling(pid);
            }
            return;
        }

        let payload = packet::payload(packet).unwrap_or_default();
        let mut sections = Sections::new();
        if header.payload_unit_start_indicator {
            if payload.is_empty() {
                state.payload_type = PayloadType::Unknown;
                state.buffer.reset();
            } else if packet::is_pes(packet) == Some(true) {
                state.payload_type = PayloadType::Pes;
            } else {
                state.payload_type = PayloadType::Psi;
                split_sections(pid, state, payload, &mut sections);
            }
        } else if state.payload_type == PayloadType::Psi && !state.buffer.is_empty() {
            state.buffer.push(payload);
            if state.buffer.is_complete() {
                sections.push(Cow::Owned(state.buffer.as_slice().to_vec()));
                state.buffer.reset();
            }
        }

        for section in &sections {
            let Some(&table_id) = section.first() else {
                continue;
            };
            let Some(channel) = Channel::from_table_id(table_id) else {
                continue;
            };
            if !self.channels.contains(channel) {
                continue;
            }
            if let Some(table) = self.registry.decode(channel, section) {
                self.handler.on_table(pid, &table);
            }
        }
    }
}

impl<H> std::fmt::Debug for Demuxer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Demuxer")
            .field("registry", &self.registry)
            .field("channels", &self.channels)
            .field("pids", &self.pids.len())
            .finish()
    }
}

/// ペイロードユニットの開始を含む`payload`からセクションを切り出す。
///
/// 前のパケットから続くセクションはポインターフィールドが示す部分で完成させる。
/// パケットの末尾で途切れるセクションは`state`のバッファに残す。
fn split_sections<'p>(
    pid: Pid,
    state: &mut PidState,
    payload: &'p [u8],
    sections: &mut Sections<'p>,
) {
    let pointer_field = payload[0] as usize;
    let data = &payload[1..];

    if pointer_field != 0 && !state.buffer.is_empty() {
        if state.buffer.remaining() == pointer_field {
            state.buffer.push(clamped(data, 0, pointer_field));
            if state.buffer.is_complete() {
                sections.push(Cow::Owned(state.buffer.as_slice().to_vec()));
            } else {
                log::debug!("section truncated by pointer field: {:?}", pid);
            }
        } else {
            log::debug!("pointer field mismatch: {:?}", pid);
            state.payload_type = PayloadType::Unknown;
        }
    }
    if !state.buffer.is_empty() {
        state.buffer.reset();
    }

    let mut rest = data.get(pointer_field..).unwrap_or_default();
    while rest.len() >= 3 && rest[0] != STUFFING_TABLE_ID {
        let Some(len) = psi::section_len(rest) else {
            break;
        };
        if rest.len() < len {
            state.buffer.start(rest, len);
            break;
        }

        let (section, next) = rest.split_at(len);
        sections.push(Cow::Borrowed(section));
        rest = next;
    }
}
