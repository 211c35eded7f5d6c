use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use aribts::demux::{Demuxer, Handler};
use aribts::table::{Channel, ChannelSet, Table};
use aribts::Pid;

#[derive(Debug)]
struct AppArgs {
    path: PathBuf,
    show_events: bool,
}

impl AppArgs {
    const HELP: &str = "\
PATとPMTを表示するコマンド

USAGE:
  tables [OPTIONS] [PATH]

FLAGS:
  -h, --help    このヘルプを表示する
  --show-events EITのイベントも表示する

ARGS:
  <PATH>        テーブルを表示するTSファイルのパス
";

    pub fn parse() -> Result<AppArgs, Box<dyn std::error::Error>> {
        let mut args = pico_args::Arguments::from_env();

        if args.contains(["-h", "--help"]) {
            println!("{}", Self::HELP);
            std::process::exit(0);
        }

        let show_events = args.contains("--show-events");

        Ok(AppArgs {
            path: args.free_from_str()?,
            show_events,
        })
    }
}

struct Printer {
    show_events: bool,
    pat_version: Option<u8>,
}

impl Handler for Printer {
    fn on_setup(&mut self) -> ChannelSet {
        let set = ChannelSet::from(Channel::Pat).with(Channel::Pmt);
        if self.show_events {
            set.with(Channel::Eit)
        } else {
            set
        }
    }

    fn on_table(&mut self, pid: Pid, table: &Table) {
        match table {
            Table::Pat(pat) => {
                if self.pat_version == Some(pat.version_number) {
                    return;
                }
                self.pat_version = Some(pat.version_number);

                println!(
                    "PAT: tsid={:04X}, version={}",
                    pat.transport_stream_id, pat.version_number
                );
                if let Some(network_pid) = pat.network_pid {
                    println!("  NIT      -> {:04X}", network_pid);
                }
                for program in &pat.programs {
                    println!(
                        "  {:04X}     -> {:04X}",
                        program.program_number.get(),
                        program.program_map_pid
                    );
                }
            }
            Table::Pmt(pmt) => {
                println!(
                    "PMT({:04X}): program={:04X}, version={}, pcr={:04X}",
                    pid, pmt.program_number, pmt.version_number, pmt.pcr_pid
                );
                for stream in &pmt.streams {
                    println!(
                        "  type={:02X} pid={:04X} es_info={}B",
                        stream.stream_type,
                        stream.elementary_pid,
                        stream.es_info.len()
                    );
                }
            }
            Table::Eit(eit) if eit.is_present_following() => {
                for event in &eit.events {
                    println!(
                        "EIT: service={:04X}, event={:04X}, start={:02X?}, duration={:02X?}",
                        eit.service_id, event.event_id, event.start_time, event.duration
                    );
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = AppArgs::parse()?;

    env_logger::init();

    let f = File::open(&args.path)?;
    let f = BufReader::with_capacity(188 * 1024, f);

    let mut demuxer = Demuxer::new(Printer {
        show_events: args.show_events,
        pat_version: None,
    });
    for packet in aribts::Packet::iter(f) {
        demuxer.feed(&packet?.0);
    }

    Ok(())
}
