//! The `disk-name` command - prints the disk name a user maps to.

use clap::Args;

#[derive(Args)]
pub struct DiskNameArgs {
    /// User identity, e.g. an e-mail address
    user: String,
}

pub fn run(args: DiskNameArgs) {
    println!("{}", warmpool::disk_name(&args.user));
}
