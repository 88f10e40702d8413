use std::process;

use clap::{Parser, Subcommand};
use kdctl_core::breakpoints::builder::BreakpointBuilder;
use kdctl_core::dispatch::ExceptionPolicy;
use kdctl_core::engine::AttachMode;
use kdctl_core::types::Address;
use kdctl_core::{create_engine, KdError, KdResult, Session, SessionOptions};
use kdctl_utils::{info, init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingGuard};

/// Command-line client for remote kernel debugging sessions.
#[derive(Parser, Debug)]
#[command(name = "kdctl")]
#[command(version)]
#[command(about = "Command-line client for remote kernel debugging sessions", long_about = None)]
struct Cli
{
    /// Kernel connection string (e.g. `net:port=50000,key=1.2.3.4` or `com:port=COM1,baud=115200`)
    connection: String,

    #[command(subcommand)]
    command: Commands,

    /// Attach to the local kernel instead of a remote one
    #[arg(long, global = true, default_value_t = false)]
    local: bool,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Drop engine output and write logs to a file instead of the console
    #[arg(short, long, global = true, default_value_t = false)]
    quiet: bool,

    /// Symbol search path handed to the engine
    #[arg(long, global = true)]
    symbol_path: Option<String>,

    /// Let the target handle exceptions instead of stopping on them
    #[arg(long, global = true, default_value_t = false)]
    pass_exceptions: bool,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Show session information (pointer width, status, current thread and process)
    Info,
    /// List all registers with their values
    Registers,
    /// Read or write one register
    Register
    {
        /// Register name (any case)
        name: String,
        /// New value (hex by default, `0n` prefix for decimal)
        #[arg(long)]
        set: Option<String>,
    },
    /// Print the current call stack
    Stack,
    /// Describe the engine's most recent event
    LastEvent,
    /// Read target virtual memory
    Memory
    {
        /// Address to read from (hex by default, `0n` prefix for decimal)
        address: String,
        /// Number of bytes to read
        #[arg(short, long, default_value_t = 16)]
        length: usize,
    },
    /// Resume the target and wait for the next event
    Go,
    /// Single-step into calls
    Step,
    /// Single-step over calls
    StepOver,
    /// Set a code breakpoint, resume, and wait for it to be hit
    Break
    {
        /// Breakpoint address
        address: String,
    },
    /// Show the current process environment block address
    Peb,
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn setup_logging(cli: &Cli) -> Result<LoggingGuard, kdctl_utils::logging::LoggingError>
{
    if cli.quiet {
        let (guard, path) = init_logging_to_file(None, cli.log_level)?;
        info!("Logging to {}", path.display());
        return Ok(guard);
    }
    match cli.log_level {
        Some(level) => init_logging_with_level(level, LogFormat::default()),
        None => init_logging(),
    }
}

fn parse_value(text: &str) -> KdResult<u64>
{
    Address::parse(text)
        .map(u64::from)
        .ok_or_else(|| KdError::InvalidArgument(format!("not a number: {text}")))
}

fn run_command(cli: Cli) -> KdResult<()>
{
    let options = SessionOptions::default()
        .with_attach(if cli.local { AttachMode::LocalKernel } else { AttachMode::KernelConnection })
        .with_quiet(cli.quiet)
        .with_exception_policy(if cli.pass_exceptions {
            ExceptionPolicy::PassToTarget
        } else {
            ExceptionPolicy::Surface
        });
    let options = match cli.symbol_path {
        Some(path) => options.with_symbol_path(path),
        None => options,
    };

    let engine = create_engine()?;
    let mut session = Session::attach(engine, &cli.connection, options)?;
    println!("Attached to {} ({}-bit)", session.connection(), session.width().bits());

    match cli.command {
        Commands::Info => print_session_info(&session)?,
        Commands::Registers => {
            let registers = session.registers()?;
            for descriptor in registers.descriptors()? {
                match registers.value(descriptor.index) {
                    Ok(value) => println!("  {:<8} {}", descriptor.name, value),
                    Err(KdError::UnsupportedRegisterType { .. }) => println!("  {:<8} <unsupported>", descriptor.name),
                    Err(e) => return Err(e),
                }
            }
        }
        Commands::Register { name, set } => {
            let registers = session.registers()?;
            if let Some(value) = set {
                registers.set_value_by_name(&name, parse_value(&value)?)?;
            }
            println!("{} = {}", name.to_ascii_lowercase(), registers.value_by_name(&name)?);
        }
        Commands::Stack => print_stack(&session)?,
        Commands::LastEvent => println!("{}", session.last_event()?),
        Commands::Memory { address, length } => {
            let address = Address::from(parse_value(&address)?);
            let mut bytes = vec![0u8; length];
            session.read_bytes(address, &mut bytes)?;
            for (row, chunk) in bytes.chunks(16).enumerate() {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                println!("{}  {}", address + (row as u64 * 16), hex.join(" "));
            }
        }
        Commands::Go => {
            session.go()?;
            println!("{}", session.last_event()?);
        }
        Commands::Step => {
            session.step_into()?;
            println!("{}", session.last_event()?);
        }
        Commands::StepOver => {
            session.step_over()?;
            println!("{}", session.last_event()?);
        }
        Commands::Break { address } => {
            let address = Address::from(parse_value(&address)?);
            let breakpoint = BreakpointBuilder::code(address).install(&mut session)?;
            info!("Breakpoint {:?} set at {}", breakpoint.id(), address);
            session.go()?;
            println!("{}", session.last_event()?);
            print_stack(&session)?;
        }
        Commands::Peb => println!("PEB: {}", session.current_peb()?),
    }

    session.detach()
}

fn print_session_info(session: &Session) -> KdResult<()>
{
    println!("Session Information:");
    println!("  Connection: {}", session.connection());
    println!("  State: {}", session.state());
    println!("  Pointer width: {} bits", session.width().bits());
    println!("  Execution status: {:?}", session.execution_status()?);
    println!("  Exception policy: {:?}", session.exception_policy());
    println!("  Current thread: {}", session.current_thread()?);
    println!("  Current process: {}", session.current_process()?);
    println!("  Last event: {}", session.last_event()?);
    Ok(())
}

fn print_stack(session: &Session) -> KdResult<()>
{
    let frames = session.stack_trace()?;
    println!("Call stack ({} frames):", frames.len());
    for frame in frames {
        println!("  #{:<3} {}", frame.frame_number(), frame);
    }
    Ok(())
}
