use std::fs::File;
use std::io::BufReader;

use aribts::demux::{Demuxer, Handler};
use aribts::table::{Channel, ChannelSet};
use aribts::Pid;

#[derive(Default)]
struct Counter {
    input: u64,
    dropped: u64,
    scrambled: u64,
}

impl Handler for Counter {
    fn on_setup(&mut self) -> ChannelSet {
        ChannelSet::from(Channel::Drop).with(Channel::Scrambling)
    }

    fn on_drop(&mut self, pid: Pid, counter: u8, expected: u8) {
        log::info!(
            "packet dropped at {:04X} (counter={:X}, expected={:X})",
            pid,
            counter,
            expected
        );
        self.dropped += 1;
    }

    fn on_scrambling(&mut self, _: Pid) {
        self.scrambled += 1;
    }
}

const HELP: &str = "\
パケットを数えるコマンド

USAGE:
  count [OPTIONS] [PATH]

FLAGS:
  -h, --help   このヘルプを表示する

OPTIONS:
  --pid <PID>  指定したPID（16進数）のみを表示する

ARGS:
  <PATH>       パケットを数えるTSファイルのパス
";

fn parse_pid(s: &str) -> Result<Pid, String> {
    let pid = u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())?;
    Pid::try_new(pid).ok_or_else(|| format!("PID out of range: {}", s))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    let only: Option<Pid> = args.opt_value_from_fn("--pid", parse_pid)?;
    let path: std::path::PathBuf = args.free_from_str()?;

    env_logger::init();

    let f = File::open(path)?;
    let f = BufReader::with_capacity(188 * 1024, f);

    let mut demuxer = Demuxer::new(Counter::default());
    for packet in aribts::Packet::iter(f) {
        let packet = packet?;
        demuxer.handler_mut().input += 1;
        demuxer.feed(&packet.0);
    }

    let counter = demuxer.handler();
    println!("Input Packets   : {:9}", counter.input);
    println!("Dropped         : {:9}", counter.dropped);
    println!("Scrambled       : {:9}", counter.scrambled);
    println!();
    println!(" PID :     Input   Dropped Scrambled");
    for (pid, info) in demuxer.info() {
        if only.map_or(true, |only| only == pid) {
            println!(
                "{:04X} : {:9} {:9} {:9}",
                pid, info.packet, info.drop, info.scrambling,
            );
        }
    }

    Ok(())
}
