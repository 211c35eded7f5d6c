//! ARIBに基づいたMPEG2-TSのパケットを読み書きし、PSI/SIセクションを分離するためのクレート。
//!
//! - [`bit`]：ビット単位の読み書き
//! - [`packet`]：TSパケットのデコードとエンコード
//! - [`demux`]：PIDごとの連続性検査とセクションの組み立て
//! - [`table`]：セクションを種別ごとのデコーダへ振り分ける

#![deny(missing_docs)]

pub mod bit;
pub mod crc32;
pub mod demux;
pub mod packet;
pub mod pid;
pub mod psi;
pub mod table;
mod utils;

pub use packet::Packet;
pub use pid::Pid;
