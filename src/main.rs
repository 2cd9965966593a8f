//! Silt type checker command line. See [`sift/README.md`] for overall
//! documentation.
//!
//! ```
//! USAGE:
//! sift <SUBCOMMAND>
//!
//! FLAGS:
//!     -h, --help       Prints help information
//!     -V, --version    Prints version information
//!
//! SUBCOMMANDS:
//!     help       Prints this message or the help of the given subcommand(s)
//!     server     Silt LSP server
//! ```
//!
//! [`sift/README.md`]: https://github.com/sift-lang/sift/blob/master/README.md

use clap::clap_app;

fn main() {
  let m = clap_app!(sift =>
    (name: "sift")
    (version: "0.1")
    (about: "Silt type checker")
    (@setting InferSubcommands)
    (@setting SubcommandRequiredElseHelp)
    (@setting VersionlessSubcommands)
    (@subcommand server =>
      (about: "Silt LSP server")
      (@arg debug: -d --debug "Enable debug logging")))
    .get_matches();

  match m.subcommand() {
    ("server", Some(m)) => sift::server::main(m),
    _ => unreachable!(),
  }
}
