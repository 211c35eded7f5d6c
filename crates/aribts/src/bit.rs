//! ビット列の読み書き。
//!
//! 位置はビット単位で管理し、先頭バイトの最上位ビットを`0`とする。
//! 範囲外の読み書きでも位置は要求された分だけ進み、読み取りは`0`または空のバイト列を返す。

/// 一度に読み書きするビット数の上限。
const CHUNK_BITS: u32 = 31;

/// `n`ビット（`n <= 32`）のマスクを返す。
#[inline]
const fn mask(n: u32) -> u64 {
    (1 << n) - 1
}

/// `n`ビットの読み書きを分割した際、先頭のチャンクのビット数を返す。
#[inline]
const fn leading_chunk(n: u32) -> u32 {
    (n - 1) % CHUNK_BITS + 1
}

/// ビット列をビッグエンディアンで読み取るためのオブジェクト。
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    /// `buffer`をビット単位で読み取るための`BitReader`を生成する。
    #[inline]
    pub fn new(buffer: &'a [u8]) -> BitReader<'a> {
        BitReader::with_position(buffer, 0)
    }

    /// `position`ビット目から`buffer`を読み取るための`BitReader`を生成する。
    #[inline]
    pub fn with_position(buffer: &'a [u8], position: usize) -> BitReader<'a> {
        BitReader { buffer, position }
    }

    /// 現在の位置をビット単位で返す。
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// 現在の位置をバイト単位で返す（端数は切り捨て）。
    #[inline]
    pub fn byte_position(&self) -> usize {
        self.position >> 3
    }

    /// 読み取り対象のバイト列を返す。
    #[inline]
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    #[inline]
    fn nbits(&self) -> usize {
        self.buffer.len() << 3
    }

    /// `n`ビット分読み取りを飛ばす。
    #[inline]
    pub fn skip(&mut self, n: usize) {
        self.position += n;
    }

    /// `n`ビット分位置を戻す。
    #[inline]
    pub fn rewind(&mut self, n: usize) {
        self.position = self.position.saturating_sub(n);
    }

    /// 31ビット以下を読み取る。
    fn read_chunk(&mut self, n: u32) -> u64 {
        debug_assert!(n <= CHUNK_BITS);

        if self.position + n as usize > self.nbits() {
            self.position += n as usize;
            return 0;
        }

        let mut value = 0;
        let mut remaining = n;
        while remaining > 0 {
            let index = self.position >> 3;
            let avail = 8 - (self.position & 7) as u32;
            let take = avail.min(remaining);

            let bits = (self.buffer[index] as u64 >> (avail - take)) & mask(take);
            value = (value << take) | bits;

            self.position += take as usize;
            remaining -= take;
        }
        value
    }

    /// `n`ビットを符号無し整数として読み取る。
    ///
    /// 32ビット以上の値は31ビットずつに分けて読み取り、`値 * 2^31 + チャンク`として組み立てる。
    /// チャンクごとに範囲を確認するため、途中から範囲外になった場合はそのチャンク以降が`0`となる。
    ///
    /// # サンプル
    ///
    /// ```
    /// use aribts::bit::BitReader;
    ///
    /// let mut br = BitReader::new(&[0b101000_01, 0b0100_0001, 0x12, 0x34]);
    /// br.skip(6);
    /// assert_eq!(br.read(6), 0b010100);
    /// assert_eq!(br.read(4), 0b0001);
    /// assert_eq!(br.read(16), 0x1234);
    ///
    /// // 範囲外でも位置は進む
    /// assert_eq!(br.read(8), 0);
    /// assert_eq!(br.position(), 40);
    /// ```
    pub fn read(&mut self, n: u32) -> u64 {
        debug_assert!((1..=64).contains(&n));

        let mut n = n;
        let mut value = 0;
        while n > CHUNK_BITS {
            let bits = leading_chunk(n);
            value = value * (1 << CHUNK_BITS) + self.read_chunk(bits);
            n -= bits;
        }
        value * (1 << CHUNK_BITS) + self.read_chunk(n)
    }

    /// 1ビットを読み取り、`1`であれば`true`を返す。
    #[inline]
    pub fn read_flag(&mut self) -> bool {
        self.read(1) != 0
    }

    /// 先頭1ビットを符号、残り`n-1`ビットを値として`n`ビットの2の補数を読み取る。
    ///
    /// # サンプル
    ///
    /// ```
    /// use aribts::bit::BitReader;
    ///
    /// let mut br = BitReader::new(&[0xFF, 0x7F, 0x80]);
    /// assert_eq!(br.read_signed(8), -1);
    /// assert_eq!(br.read_signed(8), 127);
    /// assert_eq!(br.read_signed(8), -128);
    /// ```
    pub fn read_signed(&mut self, n: u32) -> i64 {
        debug_assert!((2..=64).contains(&n));

        let sign = self.read(1) as i64;
        let magnitude = self.read(n - 1) as i64;
        (-sign << (n - 1)) | magnitude
    }

    /// `n`バイトを読み取る。
    ///
    /// 現在位置を含むバイトから切り出すため、バイト境界で呼び出す必要がある。
    /// 範囲外の場合は空のバイト列を返す。
    pub fn read_bytes(&mut self, n: usize) -> &'a [u8] {
        if self.position + (n << 3) > self.nbits() {
            self.position += n << 3;
            return &[];
        }

        let start = self.position >> 3;
        self.position += n << 3;
        &self.buffer[start..start + n]
    }

    /// ビット列、左ビットが先（bit string, left bit first）。
    #[inline]
    pub fn bslbf(&mut self, n: u32) -> u64 {
        self.read(n)
    }

    /// 符号無し整数、最上位ビットが先（unsigned integer, most significant bit first）。
    #[inline]
    pub fn uimsbf(&mut self, n: u32) -> u64 {
        self.read(n)
    }

    /// 2の補数整数、最上位（符号）ビットが先（two's complement integer, msb (sign) bit first）。
    #[inline]
    pub fn tcimsbf(&mut self, n: u32) -> i64 {
        self.read_signed(n)
    }

    /// 剰余多項式係数、最高位が先（remainder polynomial coefficients, highest order first）。
    #[inline]
    pub fn rpchof(&mut self, n: u32) -> u64 {
        self.read(n)
    }
}

/// ビット列をビッグエンディアンで書き込むためのオブジェクト。
///
/// [`BitReader`]と同じビット配置で書き込む。
/// 範囲外への書き込みは捨てられるが、位置は要求された分だけ進む。
#[derive(Debug)]
pub struct BitWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BitWriter<'a> {
    /// `buffer`にビット単位で書き込むための`BitWriter`を生成する。
    #[inline]
    pub fn new(buffer: &'a mut [u8]) -> BitWriter<'a> {
        BitWriter {
            buffer,
            position: 0,
        }
    }

    /// 現在の位置をビット単位で返す。
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// 現在の位置をバイト単位で返す（端数は切り捨て）。
    #[inline]
    pub fn byte_position(&self) -> usize {
        self.position >> 3
    }

    #[inline]
    fn nbits(&self) -> usize {
        self.buffer.len() << 3
    }

    /// `n`ビット分書き込みを飛ばす。飛ばした部分の内容は変更しない。
    #[inline]
    pub fn skip(&mut self, n: usize) {
        self.position += n;
    }

    /// 31ビット以下を書き込む。
    fn write_chunk(&mut self, n: u32, value: u64) {
        debug_assert!(n <= CHUNK_BITS);

        if self.position + n as usize > self.nbits() {
            self.position += n as usize;
            return;
        }

        let mut remaining = n;
        while remaining > 0 {
            let index = self.position >> 3;
            let avail = 8 - (self.position & 7) as u32;
            let take = avail.min(remaining);
            let shift = avail - take;

            let bits = (value >> (remaining - take)) & mask(take);
            let m = (mask(take) << shift) as u8;
            self.buffer[index] = (self.buffer[index] & !m) | ((bits << shift) as u8);

            self.position += take as usize;
            remaining -= take;
        }
    }

    /// `value`の下位`n`ビットを書き込む。
    ///
    /// # サンプル
    ///
    /// ```
    /// use aribts::bit::BitWriter;
    ///
    /// let mut buf = [0; 4];
    /// let mut bw = BitWriter::new(&mut buf);
    /// bw.write(6, 0b101000);
    /// bw.write(6, 0b010100);
    /// bw.write(20, 0x12345);
    /// assert_eq!(buf, [0b101000_01, 0b0100_0001, 0x23, 0x45]);
    /// ```
    pub fn write(&mut self, n: u32, value: u64) {
        debug_assert!((1..=64).contains(&n));

        let mut n = n;
        while n > CHUNK_BITS {
            let bits = leading_chunk(n);
            self.write_chunk(bits, (value >> (n - bits)) & mask(bits));
            n -= bits;
        }
        self.write_chunk(n, value & mask(n));
    }

    /// 1ビットを書き込む。
    #[inline]
    pub fn write_flag(&mut self, flag: bool) {
        self.write(1, flag as u64);
    }

    /// `value`を`n`ビットの2の補数として書き込む。
    pub fn write_signed(&mut self, n: u32, value: i64) {
        debug_assert!((2..=64).contains(&n));

        let value = value as u64;
        self.write(1, value >> (n - 1));
        self.write(n - 1, value);
    }

    /// バイト列を書き込む。
    ///
    /// 収まらない場合は何も書き込まないが、位置は進む。
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.position + (bytes.len() << 3) > self.nbits() {
            self.position += bytes.len() << 3;
            return;
        }

        if self.position & 7 == 0 {
            let start = self.position >> 3;
            self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
            self.position += bytes.len() << 3;
        } else {
            for &b in bytes {
                self.write_chunk(8, b as u64);
            }
        }
    }
}
