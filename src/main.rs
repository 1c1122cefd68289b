use clap::{Arg, ArgAction, Command};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;

use syncr::config::Config;
use syncr::diff::Resolution;
use syncr::engine;
use syncr::error::SyncError;
use syncr::logging;

fn resolve_config_path(matches: &clap::ArgMatches) -> Result<PathBuf, SyncError> {
	match matches.get_one::<String>("config") {
		Some(path) => Ok(PathBuf::from(path)),
		None => Config::default_path(),
	}
}

fn parse_resolutions(values: Option<clap::parser::ValuesRef<'_, String>>) -> Result<HashMap<String, Resolution>, Box<dyn Error>> {
	let mut resolutions = HashMap::new();
	let Some(values) = values else {
		return Ok(resolutions);
	};
	for raw in values {
		let (path, kind) = raw.split_once('=').ok_or_else(|| format!("invalid --resolve value: {}", raw))?;
		let resolution = match kind {
			"keep_local" => Resolution::KeepLocal,
			"keep_remote" => Resolution::KeepRemote,
			"keep_both" => Resolution::KeepBoth,
			other => return Err(format!("unknown resolution kind: {}", other).into()),
		};
		resolutions.insert(path.to_string(), resolution);
	}
	Ok(resolutions)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	logging::init_tracing();

	let matches = Command::new("syncr")
		.version("0.3.0")
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Version-controlled project-tree synchronizer over a shared mount")
		.subcommand_required(true)
		.arg(Arg::new("config").short('c').long("config").value_name("PATH").help("Path to config.json"))
		.subcommand(
			Command::new("push")
				.about("Upload local changes as a new snapshot")
				.arg(Arg::new("project").required(true))
				.arg(Arg::new("message").short('m').long("message").value_name("MSG").default_value("")),
		)
		.subcommand(
			Command::new("pull")
				.about("Download remote changes into the local tree")
				.arg(Arg::new("project").required(true))
				.arg(Arg::new("branch").short('b').long("branch").value_name("NAME"))
				.arg(
					Arg::new("resolve")
						.long("resolve")
						.value_name("path=keep_local|keep_remote|keep_both")
						.action(ArgAction::Append),
				),
		)
		.subcommand(
			Command::new("restore")
				.about("Overwrite the local tree to match a snapshot")
				.arg(Arg::new("project").required(true))
				.arg(Arg::new("snapshot").long("snapshot").value_name("ID").required(true)),
		)
		.subcommand(
			Command::new("status")
				.about("Show local changes relative to the latest snapshot")
				.arg(Arg::new("project").required(true))
				.arg(Arg::new("branch").short('b').long("branch").value_name("NAME")),
		)
		.subcommand(Command::new("gc").about("Remove blobs unreferenced by any snapshot"))
		.subcommand(
			Command::new("log")
				.about("List snapshots newest-first")
				.arg(Arg::new("project").required(true))
				.arg(Arg::new("branch").short('b').long("branch").value_name("NAME"))
				.arg(Arg::new("limit").short('n').long("limit").value_name("N")),
		)
		.get_matches();

	let config_path = resolve_config_path(&matches)?;
	let config = Config::load(&config_path)?;

	let result: Result<(), SyncError> = match matches.subcommand() {
		Some(("push", sub)) => {
			let project = sub.get_one::<String>("project").expect("required");
			let message = sub.get_one::<String>("message").map(|s| s.as_str()).unwrap_or("");
			let result = engine::push(&config, project, message, None, None, None).await?;
			println!(
				"added={} modified={} deleted={} bytes={}",
				result.files_added, result.files_modified, result.files_deleted, result.bytes_transferred
			);
			if let Some(id) = result.snapshot_id {
				println!("snapshot={}", id);
			}
			Ok(())
		}
		Some(("pull", sub)) => {
			let project = sub.get_one::<String>("project").expect("required");
			let branch = sub.get_one::<String>("branch").map(|s| s.as_str());
			let resolutions = parse_resolutions(sub.get_many::<String>("resolve"))?;
			let result = engine::pull(&config, project, branch, &resolutions, &[], None, None).await?;
			if !result.success {
				eprintln!("pull found {} conflict(s):", result.conflicts.len());
				for conflict in &result.conflicts {
					eprintln!("  {}", conflict.path);
				}
				std::process::exit(2);
			}
			println!("downloaded={} deleted={} bytes={}", result.files_downloaded, result.files_deleted, result.bytes_transferred);
			Ok(())
		}
		Some(("restore", sub)) => {
			let project = sub.get_one::<String>("project").expect("required");
			let snapshot = sub.get_one::<String>("snapshot").expect("required");
			let result = engine::restore(&config, project, snapshot, &[], None, None).await?;
			println!("downloaded={} deleted={} bytes={}", result.files_downloaded, result.files_deleted, result.bytes_transferred);
			Ok(())
		}
		Some(("status", sub)) => {
			let project = sub.get_one::<String>("project").expect("required");
			let branch = sub.get_one::<String>("branch").map(|s| s.as_str());
			let result = engine::status(&config, project, branch).await?;
			for entry in &result.added {
				println!("A  {}", entry.path);
			}
			for entry in &result.modified {
				println!("M  {}", entry.path);
			}
			for entry in &result.deleted {
				println!("D  {}", entry.path);
			}
			Ok(())
		}
		Some(("gc", _)) => {
			let result = engine::gc(&config).await?;
			println!("removed={} freed_bytes={}", result.blobs_removed, result.bytes_freed);
			Ok(())
		}
		Some(("log", sub)) => {
			let project = sub.get_one::<String>("project").expect("required");
			let branch = sub.get_one::<String>("branch").map(|s| s.as_str());
			let limit = sub.get_one::<String>("limit").and_then(|s| s.parse::<usize>().ok());
			let snapshots = engine::log(&config, project, branch, limit)?;
			for snapshot in snapshots {
				println!("{} {} {} \"{}\"", snapshot.id, snapshot.created_at, snapshot.branch, snapshot.message);
			}
			Ok(())
		}
		_ => unreachable!("subcommand_required enforces a match above"),
	};

	if let Err(e) = result {
		eprintln!("error: {}", e);
		std::process::exit(1);
	}

	Ok(())
}

// vim: ts=4
