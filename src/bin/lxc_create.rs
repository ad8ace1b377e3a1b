//! `lxc-create`: provisions fresh backing storage for a new container.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use lxc_bdev::clone::{create_storage, get_fssize};
use lxc_bdev::config::GlobalConfig;
use lxc_bdev::specs::BackendSpecs;

/// Creates the backing storage for a new container.
#[derive(Parser)]
#[command(name = "lxc-create")]
struct Args {
	/// Name of the container to create.
	#[arg(short, long)]
	name: String,

	/// Path to the runtime's JSON configuration file.
	#[arg(long, default_value = "/etc/lxc/lxc.json")]
	config: PathBuf,

	/// Backing-store type, a comma-separated list of fallbacks, or `best`. Defaults to `dir`.
	#[arg(short = 'B', long = "bdev")]
	bdev: Option<String>,

	/// `lvm`-only: volume group name.
	#[arg(long)]
	vgname: Option<String>,

	/// `lvm`-only: logical volume name.
	#[arg(long)]
	lvname: Option<String>,

	/// `lvm`/`loop`/`rbd`-only: filesystem type to put on the new volume.
	#[arg(long)]
	fstype: Option<String>,

	/// `lvm`/`loop`/`rbd`-only: filesystem size, e.g. `5G`.
	#[arg(long)]
	fssize: Option<String>,

	/// `zfs`-only: dataset root.
	#[arg(long)]
	zfsroot: Option<String>,

	/// `dir`-only: directory to use as the rootfs instead of the default location.
	#[arg(long)]
	dir: Option<String>,
}

/// Rejects backend-specific flags passed alongside an incompatible (or absent) `--bdev`.
fn validate_bdev_args(args: &Args) -> Result<(), String> {
	let bdev = args.bdev.as_deref().unwrap_or("dir");
	let lvm_only = [
		("--vgname", args.vgname.is_some()),
		("--lvname", args.lvname.is_some()),
		("--fstype", args.fstype.is_some()),
		("--fssize", args.fssize.is_some()),
	];
	if bdev != "lvm" {
		for (flag, present) in lvm_only {
			if present {
				return Err(format!("{flag} is only valid with --bdev=lvm"));
			}
		}
	}
	if bdev != "zfs" && args.zfsroot.is_some() {
		return Err("--zfsroot is only valid with --bdev=zfs".to_string());
	}
	if bdev != "dir" && args.dir.is_some() {
		return Err("--dir is only valid with --bdev=dir".to_string());
	}
	Ok(())
}

fn run(args: Args) -> Result<(), String> {
	validate_bdev_args(&args)?;

	let raw_config = std::fs::read(&args.config).map_err(|e| format!("error reading {}: {e}", args.config.display()))?;
	let config: GlobalConfig = serde_json::from_slice(&raw_config).map_err(|e| format!("error parsing {}: {e}", args.config.display()))?;

	let specs = BackendSpecs {
		dir: args.dir,
		fstype: args.fstype,
		fssize: args.fssize.as_deref().map(get_fssize),
		vg: args.vgname,
		lv: args.lvname,
		thinpool: None,
		zfsroot: args.zfsroot,
		rbdpool: None,
		rbdname: None,
	};

	let dest = config.lxc_path.join(&args.name).join("rootfs");
	std::fs::create_dir_all(dest.parent().unwrap()).map_err(|e| format!("error creating container directory: {e}"))?;

	let bdev_arg = args.bdev.as_deref().or(config.default_bdev_type.as_ref().map(|k| k.as_str()));
	let handle = create_storage(&dest, bdev_arg, &args.name, &specs).map_err(|e| format!("error creating backing store: {e}"))?;

	tracing::info!(target: "lxc_create", container = %args.name, bdev = %handle.kind, "created backing storage");
	Ok(())
}

fn main() -> ExitCode {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

	let args = Args::parse();
	match run(args) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!(target: "lxc_create", error = %e, "lxc-create failed");
			ExitCode::FAILURE
		}
	}
}

#[test]
fn test_validate_bdev_args_rejects_lvm_flags_without_lvm_bdev() {
	let args = Args {
		name: "c1".into(),
		config: PathBuf::new(),
		bdev: None,
		vgname: Some("vg0".into()),
		lvname: None,
		fstype: None,
		fssize: None,
		zfsroot: None,
		dir: None,
	};
	assert!(validate_bdev_args(&args).is_err());
}

#[test]
fn test_validate_bdev_args_accepts_matching_flags() {
	let args = Args {
		name: "c1".into(),
		config: PathBuf::new(),
		bdev: Some("lvm".into()),
		vgname: Some("vg0".into()),
		lvname: Some("lv0".into()),
		fstype: None,
		fssize: None,
		zfsroot: None,
		dir: None,
	};
	assert!(validate_bdev_args(&args).is_ok());
}

#[test]
fn test_validate_bdev_args_rejects_zfsroot_without_zfs_bdev() {
	let args = Args {
		name: "c1".into(),
		config: PathBuf::new(),
		bdev: Some("dir".into()),
		vgname: None,
		lvname: None,
		fstype: None,
		fssize: None,
		zfsroot: Some("tank/lxc".into()),
		dir: None,
	};
	assert!(validate_bdev_args(&args).is_err());
}
