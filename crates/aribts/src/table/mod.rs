//! セクションをテーブルとして解釈するためのデコーダ群と、その振り分け。
//!
//! [`Channel`]は`table_id`から決まるセクションの種別で、
//! [`Registry`]は種別ごとにデコーダを保持する。

use std::fmt;

use crate::psi::PsiSection;

mod eit;
mod iso;

pub use eit::*;
pub use iso::*;

/// 分離器が通知する種別。
///
/// `Drop`と`Scrambling`以外はテーブルの種別で、[`Channel::from_table_id`]で決まる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// パケットの欠落。
    Drop,
    /// スクランブルされたパケット。
    Scrambling,
    /// PAT（Program Association Table）。
    Pat,
    /// CAT（Conditional Access Table）。
    Cat,
    /// PMT（Program Map Table）。
    Pmt,
    /// DSM-CCセクション。
    Dsmcc,
    /// NIT（Network Information Table）。
    Nit,
    /// SDT（Service Description Table）。
    Sdt,
    /// BAT（Bouquet Association Table）。
    Bat,
    /// EIT（Event Information Table）。
    Eit,
    /// TDT（Time and Date Table）。
    Tdt,
    /// TOT（Time Offset Table）。
    Tot,
    /// DIT（Discontinuity Information Table）。
    Dit,
    /// SIT（Selection Information Table）。
    Sit,
    /// SDTT（Software Download Trigger Table）。
    Sdtt,
    /// CDT（Common Data Table）。
    Cdt,
}

/// [`Channel`]の種類数。
const CHANNEL_COUNT: usize = 16;

impl Channel {
    /// 全ての種別。
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Drop,
        Channel::Scrambling,
        Channel::Pat,
        Channel::Cat,
        Channel::Pmt,
        Channel::Dsmcc,
        Channel::Nit,
        Channel::Sdt,
        Channel::Bat,
        Channel::Eit,
        Channel::Tdt,
        Channel::Tot,
        Channel::Dit,
        Channel::Sit,
        Channel::Sdtt,
        Channel::Cdt,
    ];

    /// `table_id`からテーブルの種別を得る。
    ///
    /// 該当する種別がない場合は`None`を返す。
    ///
    /// # サンプル
    ///
    /// ```
    /// use aribts::table::Channel;
    ///
    /// assert_eq!(Channel::from_table_id(0x00), Some(Channel::Pat));
    /// assert_eq!(Channel::from_table_id(0x50), Some(Channel::Eit));
    /// assert_eq!(Channel::from_table_id(0x72), None);
    /// ```
    pub fn from_table_id(table_id: u8) -> Option<Channel> {
        match table_id {
            0x00 => Some(Channel::Pat),
            0x01 => Some(Channel::Cat),
            0x02 => Some(Channel::Pmt),
            0x3A..=0x3F => Some(Channel::Dsmcc),
            0x40 | 0x41 => Some(Channel::Nit),
            0x42 | 0x46 => Some(Channel::Sdt),
            0x4A => Some(Channel::Bat),
            0x4E..=0x6F => Some(Channel::Eit),
            0x70 => Some(Channel::Tdt),
            0x73 => Some(Channel::Tot),
            0x7E => Some(Channel::Dit),
            0x7F => Some(Channel::Sit),
            0xC3 => Some(Channel::Sdtt),
            0xC8 => Some(Channel::Cdt),
            _ => None,
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    const fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// [`Channel`]の集合。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChannelSet(u32);

impl ChannelSet {
    /// 空の集合を生成する。
    #[inline]
    pub const fn new() -> ChannelSet {
        ChannelSet(0)
    }

    /// 全ての種別を含む集合を生成する。
    #[inline]
    pub const fn all() -> ChannelSet {
        ChannelSet((1 << CHANNEL_COUNT) - 1)
    }

    /// 集合が空かどうかを返す。
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `channel`を含むかどうかを返す。
    #[inline]
    pub const fn contains(&self, channel: Channel) -> bool {
        self.0 & channel.bit() != 0
    }

    /// `channel`を追加する。
    #[inline]
    pub fn insert(&mut self, channel: Channel) {
        self.0 |= channel.bit();
    }

    /// `channel`を取り除く。
    #[inline]
    pub fn remove(&mut self, channel: Channel) {
        self.0 &= !channel.bit();
    }

    /// `channel`を追加した集合を返す。
    #[inline]
    pub const fn with(self, channel: Channel) -> ChannelSet {
        ChannelSet(self.0 | channel.bit())
    }

    /// 含まれる種別を列挙する。
    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|&c| self.contains(c))
    }
}

impl From<Channel> for ChannelSet {
    #[inline]
    fn from(channel: Channel) -> ChannelSet {
        ChannelSet::new().with(channel)
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> ChannelSet {
        let mut set = ChannelSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Channel> for ChannelSet {
    fn extend<I: IntoIterator<Item = Channel>>(&mut self, iter: I) {
        for channel in iter {
            self.insert(channel);
        }
    }
}

impl fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// デコーダが生成するテーブル。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Table<'a> {
    /// PAT。
    Pat(Pat),
    /// PMT。
    Pmt(Pmt<'a>),
    /// EIT。
    Eit(Eit<'a>),
    /// 固有のデコーダを持たないテーブルのセクション。
    Section(PsiSection<'a>),
}

impl<'a> Table<'a> {
    /// テーブルの`table_id`を返す。
    pub fn table_id(&self) -> u8 {
        match self {
            Table::Pat(_) => Pat::TABLE_ID,
            Table::Pmt(_) => Pmt::TABLE_ID,
            Table::Eit(eit) => eit.table_id,
            Table::Section(psi) => psi.table_id,
        }
    }

    /// テーブルの種別を返す。
    #[inline]
    pub fn channel(&self) -> Option<Channel> {
        Channel::from_table_id(self.table_id())
    }
}

/// セクション全体のバイト列からテーブルを生成するデコーダ。
///
/// 解釈できないセクションに対しては`None`を返す。
pub type Decoder = for<'a> fn(&'a [u8]) -> Option<Table<'a>>;

/// [`Channel`]ごとのデコーダを保持する。
///
/// [`Registry::default`]はPAT・PMT・EITに固有のデコーダを、
/// その他のテーブルに[`decode_section`]を割り当てる。
#[derive(Clone)]
pub struct Registry {
    decoders: [Option<Decoder>; CHANNEL_COUNT],
}

impl Registry {
    /// デコーダを一つも持たない`Registry`を生成する。
    #[inline]
    pub fn empty() -> Registry {
        Registry {
            decoders: [None; CHANNEL_COUNT],
        }
    }

    /// `channel`のデコーダを`decoder`に置き換える。
    ///
    /// # サンプル
    ///
    /// ```
    /// use aribts::table::{Channel, Registry, Table};
    ///
    /// fn ignore(_: &[u8]) -> Option<Table> {
    ///     None
    /// }
    ///
    /// let mut registry = Registry::default();
    /// registry.set(Channel::Eit, ignore);
    /// assert!(registry.get(Channel::Eit).is_some());
    /// ```
    #[inline]
    pub fn set(&mut self, channel: Channel, decoder: Decoder) {
        self.decoders[channel.index()] = Some(decoder);
    }

    /// `channel`のデコーダを取り除く。
    #[inline]
    pub fn remove(&mut self, channel: Channel) {
        self.decoders[channel.index()] = None;
    }

    /// `channel`のデコーダを返す。
    #[inline]
    pub fn get(&self, channel: Channel) -> Option<Decoder> {
        self.decoders[channel.index()]
    }

    /// `channel`のデコーダで`section`をデコードする。
    #[inline]
    pub fn decode<'a>(&self, channel: Channel, section: &'a [u8]) -> Option<Table<'a>> {
        let decoder = self.get(channel)?;
        decoder(section)
    }
}

impl Default for Registry {
    fn default() -> Registry {
        let mut registry = Registry::empty();
        for channel in Channel::ALL {
            match channel {
                Channel::Drop | Channel::Scrambling => {}
                Channel::Pat => registry.set(channel, decode_pat),
                Channel::Pmt => registry.set(channel, decode_pmt),
                Channel::Eit => registry.set(channel, decode_eit),
                _ => registry.set(channel, decode_section),
            }
        }
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let channels: Vec<_> = Channel::ALL
            .into_iter()
            .filter(|&c| self.get(c).is_some())
            .collect();
        f.debug_struct("Registry")
            .field("channels", &channels)
            .finish()
    }
}

/// `section`を汎用のセクションとして読み取る。
///
/// セクションシンタクスを持つセクションとTOTではCRC32が一致しなければ`None`を返す。
pub fn decode_section(section: &[u8]) -> Option<Table> {
    match PsiSection::parse(section) {
        Ok((psi, _)) => Some(Table::Section(psi)),
        Err(e) => {
            log::debug!("invalid section: {}", e);
            None
        }
    }
}

/// `section`をPATとして読み取る。
pub fn decode_pat(section: &[u8]) -> Option<Table> {
    let (psi, _) = parse_checked(section)?;
    Pat::read(&psi).map(Table::Pat)
}

/// `section`をPMTとして読み取る。
pub fn decode_pmt(section: &[u8]) -> Option<Table> {
    let (psi, _) = parse_checked(section)?;
    Pmt::read(&psi).map(Table::Pmt)
}

/// `section`をEITとして読み取る。
pub fn decode_eit(section: &[u8]) -> Option<Table> {
    Eit::read(section).map(Table::Eit)
}

fn parse_checked(section: &[u8]) -> Option<(PsiSection, usize)> {
    match PsiSection::parse(section) {
        Ok(r) => Some(r),
        Err(e) => {
            log::debug!("invalid section: {}", e);
            None
        }
    }
}

/// 12ビットの長さに続く記述子ループを読み取り、ループと残りのデータを返す。
fn read_descriptor_loop(data: &[u8]) -> Option<(&[u8], &[u8])> {
    use crate::utils::BytesExt;

    if data.len() < 2 {
        return None;
    }
    let len = (data[0..=1].read_be_16() & 0x0FFF) as usize;
    let descriptors = data.get(2..2 + len)?;
    Some((descriptors, &data[2 + len..]))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// `body`の末尾にCRC32を付与する。
    pub(crate) fn with_crc(body: &[u8]) -> Vec<u8> {
        let crc = crate::crc32::calc(body);
        [body, &crc.to_be_bytes()].concat()
    }

    #[test]
    fn test_from_table_id() {
        let cases = [
            (0x00, Some(Channel::Pat)),
            (0x01, Some(Channel::Cat)),
            (0x02, Some(Channel::Pmt)),
            (0x03, None),
            (0x39, None),
            (0x3A, Some(Channel::Dsmcc)),
            (0x3F, Some(Channel::Dsmcc)),
            (0x40, Some(Channel::Nit)),
            (0x41, Some(Channel::Nit)),
            (0x42, Some(Channel::Sdt)),
            (0x43, None),
            (0x46, Some(Channel::Sdt)),
            (0x4A, Some(Channel::Bat)),
            (0x4D, None),
            (0x4E, Some(Channel::Eit)),
            (0x6F, Some(Channel::Eit)),
            (0x70, Some(Channel::Tdt)),
            (0x71, None),
            (0x73, Some(Channel::Tot)),
            (0x7E, Some(Channel::Dit)),
            (0x7F, Some(Channel::Sit)),
            (0xC3, Some(Channel::Sdtt)),
            (0xC8, Some(Channel::Cdt)),
            (0xFF, None),
        ];
        for (table_id, channel) in cases {
            assert_eq!(Channel::from_table_id(table_id), channel, "{:#04X}", table_id);
        }
    }

    #[test]
    fn test_channel_set() {
        let mut set = ChannelSet::new();
        assert!(set.is_empty());
        set.insert(Channel::Eit);
        set.insert(Channel::Drop);
        assert!(set.contains(Channel::Eit));
        assert!(set.contains(Channel::Drop));
        assert!(!set.contains(Channel::Pat));
        assert_eq!(set.iter().collect::<Vec<_>>(), [Channel::Drop, Channel::Eit]);
        set.remove(Channel::Drop);
        assert_eq!(set, ChannelSet::from(Channel::Eit));

        let all = ChannelSet::all();
        assert!(Channel::ALL.iter().all(|&c| all.contains(c)));
        assert_eq!(Channel::ALL.into_iter().collect::<ChannelSet>(), all);
        assert_eq!(format!("{:?}", set), "{Eit}");
    }

    #[test]
    fn test_registry() {
        let pat = with_crc(&hex_literal::hex!(
            "00 B0 11 7F E0 C1 00 00 00 00 E0 10 04 00 E1 F0"
        ));

        let registry = Registry::default();
        assert!(registry.get(Channel::Drop).is_none());
        assert!(registry.get(Channel::Scrambling).is_none());
        assert!(registry.get(Channel::Cdt).is_some());
        assert_matches!(registry.decode(Channel::Pat, &pat), Some(Table::Pat(_)));

        fn raw(section: &[u8]) -> Option<Table> {
            let (psi, _) = PsiSection::parse(section).ok()?;
            Some(Table::Section(psi))
        }
        let mut registry = Registry::default();
        registry.set(Channel::Pat, raw);
        assert_matches!(
            registry.decode(Channel::Pat, &pat),
            Some(Table::Section(PsiSection { table_id: 0x00, .. }))
        );
        registry.remove(Channel::Pat);
        assert_matches!(registry.decode(Channel::Pat, &pat), None);

        assert!(Registry::empty().decode(Channel::Pat, &pat).is_none());
    }

    #[test]
    fn test_decode_section() {
        // TDT（CRCなし）
        let tdt = hex_literal::hex!("70 70 05 E4 9B 12 34 56");
        let table = decode_section(&tdt).unwrap();
        assert_eq!(table.table_id(), 0x70);
        assert_eq!(table.channel(), Some(Channel::Tdt));
        assert_matches!(table, Table::Section(PsiSection { crc32: None, .. }));

        // SDTT（CRCあり）
        let mut sdtt = with_crc(&hex_literal::hex!("C3 B0 0F 00 01 C1 00 00 7F E0 00 01 00 00"));
        assert_matches!(decode_section(&sdtt), Some(Table::Section(_)));
        sdtt[9] ^= 0x80;
        assert_matches!(decode_section(&sdtt), None);

        assert_matches!(decode_section(&[0x70]), None);
    }

    #[test]
    fn test_read_descriptor_loop() {
        let data = hex_literal::hex!("F0 03 52 01 10 AA");
        assert_eq!(
            read_descriptor_loop(&data),
            Some((&data[2..5], &data[5..]))
        );
        assert_eq!(read_descriptor_loop(&hex_literal::hex!("F0 04 52 01")), None);
        assert_eq!(read_descriptor_loop(&[0xF0]), None);
    }
}
