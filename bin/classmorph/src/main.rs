mod error;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use classmorph::jvm::class_file::Version;
use classmorph::jvm::resolver::{ChainedClassSource, DirectoryClassSource, InMemoryClassSource};
use classmorph::jvm::{BinaryName, Name, UnqualifiedName};
use classmorph::organize;
use classmorph::settings::{Settings, UnreachableCode};
use classmorph::transform::engine;
use classmorph::transform::passes::{AccessorPass, EntryHookPass, StripDebugPass};
use classmorph::transform::{MergePolicy, Pass, Pipeline};
use error::CliError;
use std::path::PathBuf;
use std::process;

fn command() -> Command {
    Command::new("classmorph")
        .version("0.1.0")
        .about("Rewrite JVM class files and recompute their stack map frames")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("transform")
                .about("Apply passes to a class file, or to every class file under a directory")
                .arg(
                    Arg::new("INPUT")
                        .help("Class file or directory of class files")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .index(1),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_name("DIRECTORY")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory where transformed class files are written"),
                )
                .arg(
                    Arg::new("classpath")
                        .long("classpath")
                        .value_name("DIRECTORY")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Extra directory of class files used to resolve supertypes"),
                )
                .arg(
                    Arg::new("entry-hook")
                        .long("entry-hook")
                        .value_name("OWNER.METHOD")
                        .help("Static `(Ljava/lang/String;)V` method to call on method entry (eg. `me/Log.enter`)"),
                )
                .arg(
                    Arg::new("methods")
                        .long("methods")
                        .value_name("NAME")
                        .action(ArgAction::Append)
                        .requires("entry-hook")
                        .help("Only hook methods with this name (all methods if absent)"),
                )
                .arg(
                    Arg::new("accessor")
                        .long("accessor")
                        .value_name("FIELD")
                        .action(ArgAction::Append)
                        .help("Add a static synthetic getter for this private field"),
                )
                .arg(
                    Arg::new("strip-debug")
                        .long("strip-debug")
                        .action(ArgAction::SetTrue)
                        .help("Drop line numbers and local variable tables"),
                )
                .arg(
                    Arg::new("unreachable")
                        .long("unreachable")
                        .value_name("POLICY")
                        .value_parser(["preserve", "neutralize", "strip"])
                        .default_value("preserve")
                        .help("What to do with unreachable code in edited methods"),
                )
                .arg(
                    Arg::new("sequential")
                        .long("sequential")
                        .action(ArgAction::SetTrue)
                        .help("Allow passes that write the same methods to run one after another"),
                )
                .arg(
                    Arg::new("threads")
                        .long("threads")
                        .value_name("N")
                        .value_parser(value_parser!(usize))
                        .help("Number of worker threads"),
                )
                .arg(
                    Arg::new("max-major")
                        .long("max-major")
                        .value_name("VERSION")
                        .value_parser(value_parser!(u16))
                        .help("Highest class file major version to accept"),
                ),
        )
        .subcommand(
            Command::new("organize")
                .about("Print which classes under a directory have to stay in the same package")
                .arg(
                    Arg::new("DIRECTORY")
                        .help("Directory of class files")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .index(1),
                ),
        )
}

fn main() {
    env_logger::init();

    let matches = command().get_matches();
    let result = match matches.subcommand() {
        Some(("transform", sub_matches)) => run_transform(sub_matches),
        Some(("organize", sub_matches)) => run_organize(sub_matches),
        _ => Err(CliError::BadArgument(String::from("missing subcommand"))),
    };

    if let Err(err) = result {
        log::error!("{}", err);
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn settings(matches: &ArgMatches) -> Result<Settings, CliError> {
    let mut settings = Settings::new();
    if let Some(policy) = matches.get_one::<String>("unreachable") {
        settings.unreachable_code = policy
            .parse::<UnreachableCode>()
            .map_err(CliError::BadArgument)?;
    }
    if matches.get_flag("sequential") {
        settings.merge_policy = MergePolicy::Sequential;
    }
    settings.threads = matches.get_one::<usize>("threads").copied();
    if let Some(max_major) = matches.get_one::<u16>("max-major") {
        if *max_major < Version::MIN_MAJOR {
            return Err(CliError::BadArgument(format!(
                "maximum major version {} is below {}",
                max_major,
                Version::MIN_MAJOR
            )));
        }
        settings.max_major_version = *max_major;
    }
    Ok(settings)
}

fn passes(matches: &ArgMatches) -> Result<Vec<Box<dyn Pass>>, CliError> {
    let mut passes: Vec<Box<dyn Pass>> = vec![];

    if let Some(hook) = matches.get_one::<String>("entry-hook") {
        let (owner, method) = hook.rsplit_once('.').ok_or_else(|| {
            CliError::BadArgument(format!("entry hook '{}' should look like `owner.method`", hook))
        })?;
        let owner = BinaryName::from_str(owner).map_err(CliError::BadArgument)?;
        let method = UnqualifiedName::from_str(method).map_err(CliError::BadArgument)?;
        let mut pass = EntryHookPass::new(owner, method);
        for name in matches.get_many::<String>("methods").into_iter().flatten() {
            pass = pass.select(name.as_str());
        }
        passes.push(Box::new(pass));
    }

    for field in matches.get_many::<String>("accessor").into_iter().flatten() {
        let field = UnqualifiedName::from_str(field).map_err(CliError::BadArgument)?;
        passes.push(Box::new(
            AccessorPass::new(field).map_err(CliError::BadArgument)?,
        ));
    }

    if matches.get_flag("strip-debug") {
        passes.push(Box::new(StripDebugPass));
    }

    Ok(passes)
}

fn run_transform(matches: &ArgMatches) -> Result<(), CliError> {
    let settings = settings(matches)?;
    let pipeline = Pipeline::new(passes(matches)?, settings.merge_policy)?;

    let input = matches
        .get_one::<PathBuf>("INPUT")
        .ok_or_else(|| CliError::BadArgument(String::from("missing input")))?;
    let output = matches
        .get_one::<PathBuf>("output")
        .ok_or_else(|| CliError::BadArgument(String::from("missing output directory")))?;

    // Supertypes resolve against the input itself, then the classpath, then the JDK basics
    let mut source = ChainedClassSource::new();
    if input.is_dir() {
        source.push(DirectoryClassSource::new(input));
    }
    for directory in matches.get_many::<PathBuf>("classpath").into_iter().flatten() {
        source.push(DirectoryClassSource::new(directory));
    }
    source.push(InMemoryClassSource::with_java_library());

    log::info!(
        "Running {} pass(es) over '{}'",
        pipeline.len(),
        input.display()
    );
    let outcomes = engine::transform_path(input, output, &pipeline, &source, &settings)?;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => log::info!(
                "Wrote '{}' ({})",
                outcome.output.display(),
                if report.changed() { "changed" } else { "unchanged" }
            ),
            Err(err) => {
                failed += 1;
                eprintln!("{}: {}", outcome.input.display(), err);
            }
        }
    }
    if failed > 0 {
        return Err(CliError::FailedClasses(failed));
    }
    Ok(())
}

fn run_organize(matches: &ArgMatches) -> Result<(), CliError> {
    let directory = matches
        .get_one::<PathBuf>("DIRECTORY")
        .ok_or_else(|| CliError::BadArgument(String::from("missing directory")))?;
    let map = organize::organize_directory(directory)?
        .single_packages_to_zero()
        .compacted();
    print!("{}", map);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn transform_arguments() {
        let matches = command()
            .try_get_matches_from([
                "classmorph",
                "transform",
                "in",
                "--output",
                "out",
                "--entry-hook",
                "me/Log.enter",
                "--methods",
                "add",
                "--strip-debug",
                "--sequential",
                "--unreachable",
                "strip",
                "--threads",
                "2",
            ])
            .unwrap();
        let (_, sub_matches) = matches.subcommand().unwrap();

        let settings = settings(sub_matches).unwrap();
        assert_eq!(settings.unreachable_code, UnreachableCode::Strip);
        assert_eq!(settings.merge_policy, MergePolicy::Sequential);
        assert_eq!(settings.threads, Some(2));

        let passes = passes(sub_matches).unwrap();
        let names: Vec<&str> = passes.iter().map(|pass| pass.name()).collect();
        assert_eq!(names, vec!["entry-hook", "strip-debug"]);
    }

    #[test]
    fn bad_hook() {
        let matches = command()
            .try_get_matches_from([
                "classmorph",
                "transform",
                "in",
                "--output",
                "out",
                "--entry-hook",
                "nodot",
            ])
            .unwrap();
        let (_, sub_matches) = matches.subcommand().unwrap();
        assert!(matches!(
            passes(sub_matches),
            Err(CliError::BadArgument(_))
        ));
    }
}
