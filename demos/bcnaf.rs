use anyhow::{Context, Result};
use std::io::Write;
use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use camac_highway::sim::{Module, SimulatedBus, SimulatedCard};
use camac_highway::{parse_command, ErrorTally, Highway, HighwayConfig, LamEvent};

struct Console {
    highway: Highway,
    card: Arc<SimulatedCard>,
    lams: Receiver<LamEvent>,
    errors: Arc<ErrorTally>,
}

fn cmd_bcnaf(line: &str, console: &Console) -> Result<()> {
    let cmd = parse_command(line)?;
    println!("{}", console.highway.bcnaf(&cmd)?);
    Ok(())
}

fn cmd_demand(args: &mut CmdScanner, console: &Console) -> Result<()> {
    console
        .card
        .raise_demand(args.parse_next()?, args.parse_next()?);
    Ok(())
}

fn cmd_lams(console: &Console) -> Result<()> {
    for event in console.lams.try_iter() {
        println!(
            "LAM from B({}) C({}) N({})",
            event.branch, event.crate_number, event.slot
        );
    }
    Ok(())
}

fn cmd_errors(console: &Console) -> Result<()> {
    for (location, fault, tally) in console.errors.snapshot() {
        println!(
            "{:?}: {} (current {}, total {})",
            location, fault, tally.current, tally.total
        );
    }
    console.errors.clear_current();
    Ok(())
}

/// A simulated branch 0 with crate 1 holding a few modules.
fn simulated_highway() -> Result<Console> {
    let config = HighwayConfig::default();
    let card = SimulatedCard::new();
    card.insert_module(1, 1, Module::with_values(&[0x00_1234, 0x12_3456, 0xff_ffff]));
    card.insert_module(1, 2, Module::registers(16));
    card.insert_module(1, 5, Module::fifo(16));
    card.add_crate(2);

    let bus = SimulatedBus::new();
    bus.install(config.card_address(0), card.clone());

    let errors = Arc::new(ErrorTally::new());
    let (highway, lams) = Highway::with_lam_queue(config);
    let highway = highway.with_error_log(errors.clone());
    highway
        .init_branch(0, &bus)
        .context("Failed to initialize branch 0")?;
    Ok(Console {
        highway,
        card,
        lams,
        errors,
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let console = simulated_highway()?;
    println!("Commands: [bcnaf] b c n a f [data], demand c n, lams, errors, quit");

    let mut stdout = std::io::stdout();
    loop {
        print!(">> ");
        stdout.flush()?;
        let mut cmd = String::new();
        if std::io::stdin().read_line(&mut cmd)? == 0 {
            return Ok(());
        }
        let mut scan = CmdScanner::new(&cmd);
        if let Err(err) = match scan.peek() {
            None => continue,
            Some("quit") | Some("q") => return Ok(()),
            Some("demand") => {
                scan.skip();
                cmd_demand(&mut scan, &console)
            }
            Some("lams") => cmd_lams(&console),
            Some("errors") => cmd_errors(&console),
            Some(_) => cmd_bcnaf(&cmd, &console),
        } {
            println!("{:#}", err)
        }
    }
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn new(buf: &'a str) -> Self {
        let splt = buf.split_whitespace().peekable();
        Self { splt }
    }
    fn peek(&mut self) -> Option<&'a str> {
        self.splt.peek().copied()
    }
    fn skip(&mut self) {
        self.splt.next();
    }
    fn parse_next<T: FromStr>(&mut self) -> Result<T> {
        self.splt
            .next()
            .context("Missing argument")?
            .parse::<T>()
            .ok()
            .context("Parse error")
    }
}
