//! Command-line front end: collects the mandatory member device list,
//! verbosity flags, and the ordered action list (§4.8, §6). `-m`/`-n`/
//! `-f` attach to whichever `-a/--add-obj` most recently preceded them
//! on the command line, which needs each flag's raw argv index rather
//! than the per-flag value lists `clap`'s derive macro collects — so
//! the action flags are parsed with the builder API instead of
//! `#[derive(Parser)]` and then zipped back together here.

use crate::engine::Action;
use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

#[derive(Debug)]
pub struct Cli {
    pub members: Vec<PathBuf>,
    pub verbosity: u8,
    pub actions: Vec<Action>,
}

fn build_command() -> Command {
    Command::new("shfsadm")
        .about("inspect and administer an unmounted SHFS volume")
        .arg(
            Arg::new("member")
                .value_name("DEVICE")
                .num_args(1..)
                .required(true)
                .help("a member device or file of the volume; repeat for multi-member volumes"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("increase log verbosity; repeatable up to twice"),
        )
        .arg(
            Arg::new("add-obj")
                .short('a')
                .long("add-obj")
                .value_name("FILE")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("mime")
                .short('m')
                .long("mime")
                .value_name("MIME")
                .action(ArgAction::Append)
                .help("mime type for the preceding --add-obj"),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .value_name("NAME")
                .action(ArgAction::Append)
                .help("stored name for the preceding --add-obj"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("for the preceding --add-obj, overwrite an existing entry's metadata instead of failing DUPLICATE"),
        )
        .arg(
            Arg::new("rm-obj")
                .short('r')
                .long("rm-obj")
                .value_name("HEX")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("cat-obj")
                .short('c')
                .long("cat-obj")
                .value_name("HEX")
                .action(ArgAction::Append)
                .help("writes the object's bytes to standard output"),
        )
        .arg(
            Arg::new("set-default")
                .short('d')
                .long("set-default")
                .value_name("HEX")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("clear-default")
                .short('C')
                .long("clear-default")
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("ls").short('l').long("ls").action(ArgAction::SetTrue))
        .arg(Arg::new("info").short('i').long("info").action(ArgAction::SetTrue))
}

/// Parses `argv` (typically `std::env::args_os()`) into a `Cli`.
pub fn parse<I, T>(argv: I) -> Result<Cli>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = build_command().try_get_matches_from(argv)?;

    let members = matches
        .get_many::<String>("member")
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect();
    let verbosity = matches.get_count("verbose").min(2);

    let actions = build_action_list(&matches)?;

    Ok(Cli {
        members,
        verbosity,
        actions,
    })
}

/// Walks every recognized action-producing flag by its raw argv index
/// and emits one `Action` per occurrence, in the order they appeared.
/// `-m`/`-n`/`-f` are folded into whichever `-a` occurrence most
/// recently preceded them.
fn build_action_list(matches: &clap::ArgMatches) -> Result<Vec<Action>> {
    #[derive(Debug)]
    enum Raw {
        AddObj(usize, PathBuf),
        Mime(usize, String),
        Name(usize, String),
        Force(usize),
        RmObj(usize, String),
        CatObj(usize, String),
        SetDefault(usize, String),
        ClearDefault(usize),
        Ls(usize),
        Info(usize),
    }

    let mut raws = Vec::new();

    if let Some(idxs) = matches.indices_of("add-obj") {
        let vals = matches.get_many::<PathBuf>("add-obj").unwrap();
        for (i, v) in idxs.zip(vals) {
            raws.push(Raw::AddObj(i, v.clone()));
        }
    }
    if let Some(idxs) = matches.indices_of("mime") {
        let vals = matches.get_many::<String>("mime").unwrap();
        for (i, v) in idxs.zip(vals) {
            raws.push(Raw::Mime(i, v.clone()));
        }
    }
    if let Some(idxs) = matches.indices_of("name") {
        let vals = matches.get_many::<String>("name").unwrap();
        for (i, v) in idxs.zip(vals) {
            raws.push(Raw::Name(i, v.clone()));
        }
    }
    if matches.get_flag("force") {
        if let Some(i) = matches.index_of("force") {
            raws.push(Raw::Force(i));
        }
    }
    if let Some(idxs) = matches.indices_of("rm-obj") {
        let vals = matches.get_many::<String>("rm-obj").unwrap();
        for (i, v) in idxs.zip(vals) {
            raws.push(Raw::RmObj(i, v.clone()));
        }
    }
    if let Some(idxs) = matches.indices_of("cat-obj") {
        let vals = matches.get_many::<String>("cat-obj").unwrap();
        for (i, v) in idxs.zip(vals) {
            raws.push(Raw::CatObj(i, v.clone()));
        }
    }
    if let Some(idxs) = matches.indices_of("set-default") {
        let vals = matches.get_many::<String>("set-default").unwrap();
        for (i, v) in idxs.zip(vals) {
            raws.push(Raw::SetDefault(i, v.clone()));
        }
    }
    if matches.get_flag("clear-default") {
        if let Some(i) = matches.index_of("clear-default") {
            raws.push(Raw::ClearDefault(i));
        }
    }
    if matches.get_flag("ls") {
        if let Some(i) = matches.index_of("ls") {
            raws.push(Raw::Ls(i));
        }
    }
    if matches.get_flag("info") {
        if let Some(i) = matches.index_of("info") {
            raws.push(Raw::Info(i));
        }
    }

    raws.sort_by_key(|r| match r {
        Raw::AddObj(i, _)
        | Raw::Mime(i, _)
        | Raw::Name(i, _)
        | Raw::Force(i)
        | Raw::RmObj(i, _)
        | Raw::CatObj(i, _)
        | Raw::SetDefault(i, _)
        | Raw::ClearDefault(i)
        | Raw::Ls(i)
        | Raw::Info(i) => *i,
    });

    let mut actions: Vec<Action> = Vec::new();
    let mut last_add_obj: Option<usize> = None;

    for raw in raws {
        match raw {
            Raw::AddObj(_, path) => {
                actions.push(Action::AddObj { path, mime: None, name: None, force: false });
                last_add_obj = Some(actions.len() - 1);
            }
            Raw::Mime(_, mime) => {
                let idx = last_add_obj.ok_or_else(|| anyhow!("-m/--mime given without a preceding --add-obj"))?;
                if let Action::AddObj { mime: slot, .. } = &mut actions[idx] {
                    *slot = Some(mime);
                }
            }
            Raw::Name(_, name) => {
                let idx = last_add_obj.ok_or_else(|| anyhow!("-n/--name given without a preceding --add-obj"))?;
                if let Action::AddObj { name: slot, .. } = &mut actions[idx] {
                    *slot = Some(name);
                }
            }
            Raw::Force(_) => {
                let idx = last_add_obj.ok_or_else(|| anyhow!("-f/--force given without a preceding --add-obj"))?;
                if let Action::AddObj { force: slot, .. } = &mut actions[idx] {
                    *slot = true;
                }
            }
            Raw::RmObj(_, hash_hex) => actions.push(Action::RmObj { hash_hex }),
            Raw::CatObj(_, hash_hex) => actions.push(Action::CatObj { hash_hex }),
            Raw::SetDefault(_, hash_hex) => actions.push(Action::SetDefault { hash_hex }),
            Raw::ClearDefault(_) => actions.push(Action::ClearDefault),
            Raw::Ls(_) => actions.push(Action::Ls),
            Raw::Info(_) => actions.push(Action::Info),
        }
    }

    Ok(actions)
}
