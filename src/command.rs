//! The `bcnaf` console command: one 24-bit single action typed as
//! `[bcnaf] b c n a f [data]`.

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case};
use nom::character::complete::{digit1, hex_digit1, space0, space1};
use nom::combinator::{all_consuming, map_res, opt, recognize};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;
use snafu::Snafu;

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Fault};
use crate::highway::Highway;
use crate::types::{Channel, Cnaf, Function};

/// The command line could not be parsed.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("Can't parse {:?}, usage: bcnaf b c n a f [data]", line))]
pub struct ParseError {
    line: String,
}

/// A parsed `bcnaf` command. Values are range checked when it runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BcnafCommand {
    pub branch: u32,
    pub crate_number: u32,
    pub slot: u32,
    pub subaddress: u32,
    pub function: u32,
    pub data: i32,
}

fn separator(s: &str) -> IResult<&str, &str> {
    alt((delimited(space0, tag(","), space0), space1))(s)
}

fn number(s: &str) -> IResult<&str, u32> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |h| {
            u32::from_str_radix(h, 16)
        }),
        map_res(digit1, u32::from_str),
    ))(s)
}

fn data_word(s: &str) -> IResult<&str, i32> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |h| {
            u32::from_str_radix(h, 16).map(|v| v as i32)
        }),
        map_res(recognize(pair(opt(tag("-")), digit1)), i32::from_str),
    ))(s)
}

fn command(s: &str) -> IResult<&str, BcnafCommand> {
    let (s, _) = preceded(space0, opt(terminated(tag_no_case("bcnaf"), space1)))(s)?;
    let (s, (branch, crate_number, slot, subaddress, function)) = tuple((
        number,
        preceded(separator, number),
        preceded(separator, number),
        preceded(separator, number),
        preceded(separator, number),
    ))(s)?;
    let (s, data) = terminated(opt(preceded(separator, data_word)), space0)(s)?;
    Ok((
        s,
        BcnafCommand {
            branch,
            crate_number,
            slot,
            subaddress,
            function,
            data: data.unwrap_or(0),
        },
    ))
}

/// Parse a `bcnaf` command line.
pub fn parse_command(line: &str) -> Result<BcnafCommand, ParseError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    match all_consuming(command)(line) {
        Ok((_, cmd)) => Ok(cmd),
        Err(_) => ParseSnafu { line }.fail(),
    }
}

impl FromStr for BcnafCommand {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_command(s)
    }
}

/// Outcome of a `bcnaf` command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Report {
    pub cnaf: Cnaf,
    pub q: bool,
    pub x: bool,
    pub data: i32,
    pub fault: Option<Fault>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.cnaf)?;
        writeln!(
            f,
            "Reply: q = {}, x = {}, data = {:#08x} ({})",
            u8::from(self.q),
            u8::from(self.x),
            self.data,
            self.data
        )?;
        match self.fault {
            None => write!(f, "Status: OK"),
            Some(fault) => write!(f, "Status: {}", fault),
        }
    }
}

impl Highway {
    /// Run a `bcnaf` command as a 24-bit single action.
    ///
    /// Highway faults are part of the report. Out of range arguments and
    /// uninitialized branches are errors.
    pub fn bcnaf(&self, cmd: &BcnafCommand) -> Result<Report, Error> {
        let ext = Channel::new(cmd.branch, cmd.crate_number, cmd.slot, cmd.subaddress)?;
        self.branch_index(*ext.branch())?;
        let f = Function::new(cmd.function)?;
        let cnaf = ext.with_function(f);
        match self.cfsa(f, ext, cmd.data) {
            Ok(reply) => Ok(Report {
                cnaf,
                q: reply.q,
                x: true,
                data: reply.data,
                fault: None,
            }),
            Err(Error::Highway { fault, .. }) => Ok(Report {
                cnaf,
                q: false,
                x: fault != Fault::NoXResponse,
                data: 0,
                fault: Some(fault),
            }),
            Err(e) => Err(e),
        }
    }
}
