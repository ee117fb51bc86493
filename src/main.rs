//! Hosted entry point. The real Yalnix boot is a single call the simulator
//! makes into `KernelStart`; here the simulator side is `SimHal` and this
//! binary plays the role the simulator's own `main` would, parsing the
//! command line the way the teacher's `mkfs` binary does with `clap`.

use clap::Parser;

use yalnix::context::UserContext;
use yalnix::hal::SimHal;
use yalnix::kernel::Kernel;

/// Boots a Yalnix kernel against a simulated machine of the given size.
#[derive(Parser, Debug)]
#[command(name = "yalnix", about = "Boots the kernel against a simulated machine")]
struct Cli {
    /// Simulated physical memory size, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pmem_size: usize,

    /// Program to load as the init process (informational in this rewrite;
    /// see DESIGN.md for what `exec` actually does with it).
    program: Option<String>,

    /// Arguments passed through to the init process.
    args: Vec<String>,

    /// Raise log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!(
        "booting: pmem_size={} program={:?} args={:?}",
        cli.pmem_size,
        cli.program,
        cli.args
    );

    let mut hal = SimHal::new(cli.pmem_size);
    let mut uctxt = UserContext::default();
    let kernel = Kernel::start(&mut hal, &mut uctxt);

    log::info!(
        "boot complete: init pid={} idle pid={}",
        kernel.sched.init_pid,
        kernel.sched.idle_pid
    );

    // Running actual user-mode instructions is the simulator's job (spec
    // §1); this hosted binary only exercises the kernel side of the
    // boundary, so it stops here once boot has handed off to init.
}
