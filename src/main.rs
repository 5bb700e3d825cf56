mod cli;

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use derivebox::{
    color_enabled_stderr, color_enabled_stdout, exit_code_for_pipeline_error, log_error_stderr,
    log_info_stderr, log_success_stdout, set_color_mode, telemetry_init, BuildLogLine,
    DeriveRequest, DockerCli, Outcome, Pipeline, PipelineError, Settings,
};

use crate::cli::Cli;

fn fail(use_err: bool, msg: &str, e: &PipelineError) -> ExitCode {
    log_error_stderr(use_err, msg);
    ExitCode::from(exit_code_for_pipeline_error(e))
}

/// Failure line that tells build failures and validation failures apart.
fn failure_message(e: &PipelineError, derived: &str) -> String {
    match e {
        PipelineError::Validation(inner) => {
            format!("derivebox: derived image {derived} failed validation: {inner}")
        }
        PipelineError::BuildFailed(_) => format!("derivebox: {e}"),
        _ => format!("derivebox: build failed: {e}"),
    }
}

fn print_hints(outcome: &Outcome, settings: &Settings) {
    let use_out = color_enabled_stdout();
    let tag = &outcome.derived;
    if outcome.validated {
        log_success_stdout(use_out, &format!("derivebox: derived image ready: {tag}"));
    } else {
        log_success_stdout(
            use_out,
            &format!("derivebox: derived image built (not validated): {tag}"),
        );
    }
    println!();
    println!("  test it:  docker run --rm --network host -it {tag}");
    if let Some(registry) = settings
        .registry_prefix
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
    {
        println!("  push it:  docker login {registry}");
        println!("            docker push {tag}");
    }
    println!();
}

fn echo_record(line: &BuildLogLine) {
    if let Some(ref s) = line.stream {
        let mut out = io::stdout().lock();
        let _ = out.write_all(s.as_bytes());
        if !s.ends_with('\n') {
            let _ = out.write_all(b"\n");
        }
        let _ = out.flush();
    }
    if let Some(ref err) = line.error {
        eprintln!("{}", err.trim_end());
    }
}

fn main() -> ExitCode {
    // Load environment variables from .env if present (no error if missing)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Some(mode) = cli.color {
        set_color_mode(mode);
    }
    let _telemetry = telemetry_init(cli.verbose, cli.quiet);
    let use_err = color_enabled_stderr();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => return fail(use_err, &format!("derivebox: {e}"), &e),
    };
    cli.apply(&mut settings);
    if let Err(e) = settings.validate() {
        return fail(use_err, &format!("derivebox: {e}"), &e);
    }

    let engine = match DockerCli::detect(settings.docker_host.as_deref(), settings.engine_timeout) {
        Ok(engine) => engine,
        Err(e) => {
            let e = PipelineError::from(e);
            return fail(use_err, &format!("derivebox: {e}"), &e);
        }
    };

    let mut request = DeriveRequest::new(&cli.source_dir, cli.image_name.clone());
    request.build_args = cli.build_arg.iter().cloned().collect();
    request.skip_validate = cli.skip_validate;

    if cli.verbose {
        log_info_stderr(use_err, &format!("derivebox: engine: {:?}", engine.endpoint()));
        log_info_stderr(
            use_err,
            &format!(
                "derivebox: build timeout: {}",
                humantime::format_duration(settings.build_timeout)
            ),
        );
    }

    let quiet = cli.quiet;
    let mut sink = |line: &BuildLogLine| {
        if !quiet {
            echo_record(line);
        }
    };
    let pipeline = Pipeline::new(&engine, &settings);

    if cli.print_manifest {
        return match pipeline.plan(&request, &mut sink) {
            Ok(plan) => {
                print!("{}", plan.manifest);
                ExitCode::SUCCESS
            }
            Err(e) => fail(use_err, &failure_message(&e, &cli.image_name), &e),
        };
    }

    match pipeline.run(&request, &mut sink) {
        Ok(outcome) => {
            if !quiet {
                print_hints(&outcome, &settings);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            let derived = settings.derived_tag(&cli.image_name);
            fail(use_err, &failure_message(&e, &derived), &e)
        }
    }
}
