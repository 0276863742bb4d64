#[macro_use] extern crate log;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use structopt::StructOpt;
use tokio::sync::Mutex;

use bank::{Account, Deposit, TRANSFERS_PER_ROUND};

#[derive(StructOpt)]
#[structopt(name = "bank")]
struct Opt {
    /// Unique process ID
    #[structopt(short = "i", long = "id")]
    id: usize,

    /// Total number of processes
    #[structopt(short = "c", long = "count")]
    count: usize,

    /// Port of process 0 when running on localhost; process `i` uses `base + i`
    #[structopt(short = "b", long = "base", default_value = "20000")]
    base: u16,

    /// JSON membership file, overrides `--base`
    #[structopt(short = "m", long = "members", parse(from_os_str))]
    members: Option<PathBuf>,

    /// Time spent inside the critical section (in milliseconds)
    #[structopt(long = "hold", default_value = "2000")]
    hold: u64,

    /// Heartbeat timeout between processes (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "1000")]
    timeout: u64,

    /// Give up on a critical section request after this long (in milliseconds)
    /// and try again, which breaks causal-priority deadlocks
    #[structopt(short = "a", long = "acquire", default_value = "30000")]
    acquire: u64,

    /// Number of critical sections to enter before exiting
    #[structopt(short = "r", long = "rounds")]
    rounds: Option<usize>,

    /// Order requests by Lamport sum instead of causality
    #[structopt(short = "l", long = "lamport")]
    lamport: bool,

    /// Logging verbosity, repeat for more
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

fn setup_logger(id: usize, verbose: u8) -> Result<(), fern::InitError> {
    let level = match verbose {
    | 0 => log::LevelFilter::Info,
    | 1 => log::LevelFilter::Debug,
    | _ => log::LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [P{}] [{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                id,
                record.level(),
                record.target(),
                message,
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

async fn run(opt: Opt) -> ricart::Result<()> {
    let directory = match &opt.members {
    | Some(path) => ricart::Directory::from_path(path)?,
    | None => ricart::Directory::localhost(opt.count, opt.base)?,
    };
    if directory.len() != opt.count {
        return Err(ricart::Error::Membership(format!(
            "expected {} processes, found {}",
            opt.count,
            directory.len(),
        )))
    }

    let priority = if opt.lamport {
        ricart::Priority::Lamport
    } else {
        ricart::Priority::Causal
    };

    let config = ricart::Config::<Deposit>::new(opt.id, directory)
        .with_timeout(Duration::from_millis(opt.timeout))
        .with_priority(priority)
        .with_acquire_timeout(Duration::from_millis(opt.acquire));

    let (handle, mut deliveries) = config.run().await?;
    let account = Arc::new(Mutex::new(Account::new(opt.id, opt.count)));

    let ledger = account.clone();
    tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            let mut account = ledger.lock().await;
            account.deposit(delivery.payload);
            info!(
                "received {} from P{} at {}, balance {}",
                delivery.payload.amount,
                delivery.from,
                delivery.clock,
                account.balance(),
            );
        }
    });

    let mut rng = StdRng::from_entropy();
    let mut entered = 0;
    while opt.rounds.map_or(true, |rounds| entered < rounds) {
        let idle = rng.gen_range(1000..=5000);
        tokio::time::sleep(Duration::from_millis(idle)).await;

        let guard = match handle.acquire().await {
        | Ok(guard) => guard,
        | Err(error) if error.is_retryable() => {
            warn!("{}, trying again", error);
            continue
        }
        | Err(error) => return Err(error),
        };

        tokio::time::sleep(Duration::from_millis(opt.hold)).await;
        for _ in 0..TRANSFERS_PER_ROUND {
            let transfer = account.lock().await.transfer(&mut rng);
            let (to, deposit) = match transfer {
            | Some(transfer) => transfer,
            | None => {
                info!("insufficient funds, skipping transfer");
                continue
            }
            };
            match handle.send(to, deposit).await {
            | Ok(timestamp) => info!(
                "sent {} to P{} at {}, balance {}",
                deposit.amount,
                to,
                timestamp,
                account.lock().await.balance(),
            ),
            | Err(error) => {
                warn!("failed to send {} to P{}: {}", deposit.amount, to, error);
                account.lock().await.deposit(deposit);
            }
            }
        }
        guard.release();
        entered += 1;
    }

    info!("finished {} rounds with balance {}", entered, account.lock().await.balance());
    Ok(())
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    if let Err(error) = setup_logger(opt.id, opt.verbose) {
        eprintln!("failed to initialize logger: {}", error);
    }
    if let Err(error) = run(opt).await {
        error!("{}", error);
        std::process::exit(1);
    }
}
