pub mod auth;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_STATIC_DIR: &str = "static-dir";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::git_commit_hash()).into_boxed_str(),
    );

    let command = Command::new("puyo")
        .about("Game server with session authentication")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("PUYO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "Postgres connection string. Leave unset (or use memory://) to keep users and sessions in memory.",
                )
                .env("PUYO_DSN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_STATIC_DIR)
                .long("static-dir")
                .help("Directory of static files served for unmatched paths")
                .env("PUYO_STATIC_DIR")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        );

    let command = auth::with_args(command);
    logging::with_args(command)
}
