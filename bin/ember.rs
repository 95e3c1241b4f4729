use anyhow::Error as Failure;
use clap::Parser;
use ember::uci::{Outbound, Uci, UciParser};
use ember::util::thread;
use ember::warn;
use futures::{channel::mpsc::unbounded, executor::block_on, sink::unfold as sink};
use std::future::ready;
use std::io::{prelude::*, stdin, stdout};

#[derive(Debug, Parser)]
#[clap(name = "Ember", version, author)]
#[clap(help_template = "
{name} v{version}

{name} is a parallel alpha-beta chess engine speaking the UCI protocol.
It is released as free software under the terms of the GNU GPLv3 license.
")]
struct Cli {}

fn main() -> Result<(), Failure> {
    let _args = Cli::parse();

    let (tx, input) = unbounded();

    thread::spawn(move || {
        let mut lines = stdin().lock().lines();
        while let Some(Ok(line)) = lines.next() {
            match line.trim() {
                "" => continue,
                trimmed => match UciParser.parse(trimmed) {
                    Err(e) => warn!("Unknown command: {trimmed} ({e})"),
                    Ok(cmd) => match tx.unbounded_send(cmd) {
                        Ok(()) => continue,
                        Err(_) => break,
                    },
                },
            }
        }
    });

    let handle = thread::spawn(move || {
        let mut stdout = stdout().lock();
        let output = sink((), move |_, o: Outbound| ready(writeln!(stdout, "{o}")));
        Ok(block_on(Uci::new(input, output).run())?)
    });

    match handle.join() {
        Ok(result) => result,
        Err(_) => Ok(()),
    }
}
