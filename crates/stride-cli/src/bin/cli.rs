use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use stride::{
    DType, Device, DeviceRequest, FillPolicy, Runtime, RuntimeConfig, Scalar, Shape, Tensor,
};

pub fn start_logger(level: log::LevelFilter) {
    let logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply();
    match logger {
        Ok(_) => log::info!("Logging initialized."),
        Err(error) => eprintln!("Error initializing logging: {:?}", error),
    }
}

fn parse_list<T: std::str::FromStr>(text: &str) -> anyhow::Result<Vec<T>> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }
    text.split(',')
        .map(|part| {
            part.trim()
                .parse::<T>()
                .map_err(|_| anyhow::anyhow!("Invalid list element {:?}", part))
        })
        .collect()
}

fn parse_shape(text: &str) -> anyhow::Result<Shape> {
    Ok(Shape::from(parse_list::<usize>(text)?))
}

fn parse_request(text: &str) -> anyhow::Result<DeviceRequest> {
    match text.to_ascii_lowercase().as_str() {
        "cpu" => Ok(DeviceRequest::CPU),
        other => {
            let ordinal = other
                .strip_prefix("acc:")
                .context("Locations are `cpu` or `acc:<ordinal>`")?;
            Ok(DeviceRequest::Accelerator(ordinal.parse()?))
        }
    }
}

fn build_runtime(matches: &ArgMatches) -> anyhow::Result<Runtime> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::from_env()?,
    };
    if let Some(&accelerators) = matches.get_one::<usize>("accelerators") {
        config.accelerators = accelerators;
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.seed = Some(seed);
    }
    Ok(Runtime::new(config))
}

fn report(tensor: &Tensor, json: bool) -> anyhow::Result<()> {
    if json {
        let host = tensor.to(&Device::CPU)?;
        let value = serde_json::json!({
            "id": tensor.id().value(),
            "shape": tensor.shape().to_vec(),
            "strides": tensor.strides().to_vec(),
            "offset": tensor.offset(),
            "dtype": tensor.dt(),
            "device": tensor.device().label(),
            "contiguous": tensor.is_contiguous(),
            "bytes": tensor.num_bytes(),
            "storage_refs": tensor.storage_refs(),
            "data": host.to_nested()?,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", tensor);
        println!(
            "  shape={:?} strides={:?} offset={} contiguous={} bytes={}",
            tensor.shape(),
            tensor.strides(),
            tensor.offset(),
            tensor.is_contiguous(),
            tensor.num_bytes()
        );
    }
    Ok(())
}

/// Applies one `name:arg:arg` step of a view pipeline.
fn apply_step(tensor: &Tensor, step: &str) -> anyhow::Result<Tensor> {
    let mut parts = step.split(':');
    let name = parts.next().unwrap_or_default();
    let args = parts.collect::<Vec<_>>();
    let usize_at = |i: usize| -> anyhow::Result<usize> {
        let arg = args
            .get(i)
            .with_context(|| format!("`{}` is missing argument {}", name, i + 1))?;
        Ok(arg.parse()?)
    };
    let result = match name {
        "transpose" => tensor.transpose(usize_at(0)?, usize_at(1)?)?,
        "permute" => tensor.permute(&parse_list::<usize>(args.first().copied().unwrap_or(""))?)?,
        "reshape" => tensor.view(&parse_list::<isize>(args.first().copied().unwrap_or(""))?)?,
        "slice" => {
            let every = if args.len() > 3 { usize_at(3)? } else { 1 };
            tensor.slice(usize_at(0)?, usize_at(1)?, usize_at(2)?, every)?
        }
        "select" => tensor.select(usize_at(0)?, usize_at(1)?)?,
        "squeeze" if args.is_empty() => tensor.squeeze_all()?,
        "squeeze" => tensor.squeeze(usize_at(0)?)?,
        "unsqueeze" => tensor.unsqueeze(usize_at(0)?)?,
        "contiguous" => tensor.contiguous()?,
        "copy" => tensor.deep_clone()?,
        other => anyhow::bail!("Unknown view step {:?}", other),
    };
    log::info!("{} -> {:?} {:?}", step, result.shape(), result.strides());
    Ok(result)
}

fn construct(matches: &ArgMatches, runtime: &Runtime) -> anyhow::Result<Tensor> {
    let shape = parse_shape(matches.get_one::<String>("shape").map_or("", String::as_str))?;
    let dt = *matches.get_one::<DType>("dtype").unwrap_or(&DType::F32);
    let request = parse_request(matches.get_one::<String>("device").map_or("cpu", String::as_str))?;
    let device = runtime.request_device(request)?;
    let seed = runtime.config().seed;
    let fill = match matches.get_one::<String>("fill").map(String::as_str) {
        None | Some("zeros") => FillPolicy::Zeros,
        Some("ones") => FillPolicy::Ones,
        Some("empty") => FillPolicy::Empty,
        Some("arange") => {
            let host = Tensor::arange(0i64, shape.numel() as i64, 1, &Device::CPU)?
                .reshape(shape)?
                .cast(dt)?;
            return Ok(host.to(&device)?);
        }
        Some("randn") => FillPolicy::Random {
            distribution: stride::Distribution::STANDARD_NORMAL,
            seed,
        },
        Some("rand") => FillPolicy::Random {
            distribution: stride::Distribution::UNIT_UNIFORM,
            seed,
        },
        Some(value) => FillPolicy::Full(Scalar::Float(
            value
                .parse()
                .with_context(|| format!("Unknown fill {:?}", value))?,
        )),
    };
    Ok(Tensor::allocate(shape, dt, fill, &device)?)
}

fn source(matches: &ArgMatches, runtime: &Runtime) -> anyhow::Result<Tensor> {
    match matches.get_one::<PathBuf>("input") {
        Some(path) => Ok(Tensor::read_npy_file(path)
            .with_context(|| format!("Failed to read {}", path.display()))?),
        None => construct(matches, runtime),
    }
}

fn section(title: &str) {
    println!("\n== {} ==", title);
}

/// Runs every section of the walkthrough on small tensors.
fn tour(runtime: &Runtime, json: bool) -> anyhow::Result<()> {
    section("construction");
    let base = Tensor::arange(0i32, 12, 1, &Device::CPU)?.reshape(stride::shape![3, 4])?;
    report(&base, json)?;
    let noise = Tensor::randn::<f32>(stride::shape![2, 2], runtime.config().seed, &Device::CPU)?;
    report(&noise, json)?;

    section("views share the buffer");
    let col = base.transpose(0, 1)?.select(0, 1)?;
    report(&col, json)?;
    col.fill(-1i32)?;
    println!("after filling column 1 through the view:");
    report(&base, json)?;
    println!("handles on the buffer: {}", base.storage_refs());

    section("copies do not");
    let owned = base.slice(0, 0, 2, 1)?.deep_clone()?;
    base.fill(0i32)?;
    report(&owned, json)?;
    println!("shares storage with base: {}", owned.shares_storage(&base));

    section("shape manipulation");
    let every_other = owned.slice(1, 0, 4, 2)?;
    report(&every_other, json)?;
    match every_other.reshape(stride::shape![4]) {
        Ok(t) => report(&t, json)?,
        Err(e) => println!("reshape refused: {}", e),
    }
    report(&every_other.reshape_copy(stride::shape![4])?, json)?;
    report(&owned.unsqueeze(0)?, json)?;
    println!("item at [1, 3]: {}", owned.select(0, 1)?.select(0, 3)?.to_scalar()?);

    section("casting");
    report(&owned.cast(DType::F16)?, json)?;

    section("relocation");
    for device in runtime.locations() {
        let moved = owned.to(&device)?;
        println!("{:?}: {}", device, moved);
    }
    Ok(())
}

fn tensor_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("shape")
                .short('s')
                .long("shape")
                .default_value("3,4")
                .help("Comma separated dimensions."),
        )
        .arg(
            Arg::new("dtype")
                .short('d')
                .long("dtype")
                .default_value("f32")
                .value_parser(value_parser!(DType)),
        )
        .arg(
            Arg::new("fill")
                .short('f')
                .long("fill")
                .default_value("arange")
                .help("zeros, ones, empty, arange, randn, rand or a number."),
        )
        .arg(
            Arg::new("device")
                .long("device")
                .default_value("cpu")
                .help("cpu or acc:<ordinal>."),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_parser(value_parser!(PathBuf))
                .help("Load the tensor from a .npy file instead."),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Write the result as .npy."),
        )
}

fn main() -> anyhow::Result<()> {
    let matches = Command::new("stride")
        .about("Strided tensor views from the command line")
        .version("0.1.0")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("JSON runtime config. Defaults to STRIDE_* environment variables."),
        )
        .arg(
            Arg::new("accelerators")
                .long("accelerators")
                .global(true)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .global(true)
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("warn")
                .value_parser(value_parser!(log::LevelFilter)),
        )
        .subcommand(
            Command::new("tour")
                .about("Walk through construction, views, copies, casts and relocation."),
        )
        .subcommand(tensor_args(
            Command::new("construct").about("Allocate a tensor and print it."),
        ))
        .subcommand(
            tensor_args(Command::new("views").about("Apply a pipeline of view steps.")).arg(
                Arg::new("step")
                    .long("step")
                    .action(ArgAction::Append)
                    .help("e.g. transpose:0:1, slice:1:0:4:2, select:0:1, reshape:2,-1"),
            ),
        )
        .subcommand(
            tensor_args(Command::new("cast").about("Convert to another dtype.")).arg(
                Arg::new("to")
                    .long("to")
                    .required(true)
                    .value_parser(value_parser!(DType)),
            ),
        )
        .subcommand(
            tensor_args(Command::new("relocate").about("Copy to another location.")).arg(
                Arg::new("to")
                    .long("to")
                    .required(true)
                    .help("cpu or acc:<ordinal>."),
            ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Print a .npy file.")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .get_matches();

    let level = *matches
        .get_one::<log::LevelFilter>("log-level")
        .unwrap_or(&log::LevelFilter::Warn);
    start_logger(level);
    let runtime = build_runtime(&matches)?;
    let json = matches.get_flag("json");

    if matches.subcommand_name() == Some("tour") {
        return tour(&runtime, json);
    }

    let (result, sub) = match matches.subcommand() {
        Some(("construct", sub)) => (construct(sub, &runtime)?, sub),
        Some(("views", sub)) => {
            let mut tensor = source(sub, &runtime)?;
            for step in sub.get_many::<String>("step").into_iter().flatten() {
                tensor = apply_step(&tensor, step)?;
            }
            (tensor, sub)
        }
        Some(("cast", sub)) => {
            let dt = *sub.get_one::<DType>("to").context("--to is required")?;
            (source(sub, &runtime)?.cast(dt)?, sub)
        }
        Some(("relocate", sub)) => {
            let request = parse_request(sub.get_one::<String>("to").context("--to is required")?)?;
            (source(sub, &runtime)?.relocate(request, &runtime)?, sub)
        }
        Some(("inspect", sub)) => {
            let path = sub.get_one::<PathBuf>("path").context("path is required")?;
            (Tensor::read_npy_file(path)?, sub)
        }
        _ => unreachable!("subcommand_required"),
    };

    report(&result, json)?;
    if let Some(path) = sub.try_get_one::<PathBuf>("output").ok().flatten() {
        result.to(&Device::CPU)?.write_npy_file(path)?;
        log::info!("Wrote {}", path.display());
    }
    Ok(())
}
