// RouterSim: Simulating Multi-Protocol Routing and Forwarding
// Copyright (C) 2021  Tibor Schneider
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Runner for the router simulator: loads a YAML scenario, runs the router for a bounded
//! duration, and prints the resulting route table and statistics.

use clap::Parser;
use log::*;
use routersim::config::RouterConfig;
use routersim::rib::RouteFilter;
use routersim::Router;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "routersim", about = "Single-node multi-protocol router simulator")]
struct Args {
    /// Path to the YAML scenario
    #[arg(short, long)]
    config: PathBuf,

    /// How long to run the simulation, in seconds
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Write the resulting route snapshot to this file
    #[arg(long)]
    export_routes: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let args = Args::parse();

    let yaml = std::fs::read_to_string(&args.config)?;
    let config = RouterConfig::from_yaml(&yaml)?;
    let hostname = config.router.hostname.clone();

    let mut router = Router::new(config)?;
    info!("{}: running for {} seconds", hostname, args.duration);
    router.start();
    std::thread::sleep(Duration::from_secs(args.duration));
    router.stop();

    println!("==== neighbors ====");
    for n in router.neighbors() {
        println!(
            "{} {} {:?} sent {} received {}{}",
            n.protocol,
            n.peer,
            n.state,
            n.msgs_sent,
            n.msgs_received,
            n.last_error.map(|e| format!(" last error: {}", e)).unwrap_or_default()
        );
    }

    println!("==== routes ====");
    let snapshot = router.rib().export_snapshot();
    print!("{}", snapshot);
    if let Some(path) = args.export_routes {
        std::fs::write(&path, &snapshot)?;
        info!("route snapshot written to {}", path.display());
    }
    let candidates = router.rib().routes(&RouteFilter::default()).len();
    println!("({} candidate routes in the RIB)", candidates);

    println!("==== metrics ====");
    print!("{}", router.metrics().snapshot());

    Ok(())
}
