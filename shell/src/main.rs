//! An interactive shell over a mounted SecFs image: enough
//! commands to poke at the filesystem by hand or drive it from a
//! scripted test -- `ls`, `cd`, `mkdir`, `touch`, `cat`, `del`,
//! `import`, `testseek`, `exit`.

use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;

use clap::Parser;
use log::warn;

use secfs::format::{self, DEFAULT_BLOCKS, DEFAULT_NINODES};
use secfs::{Filesystem, FsError, OpenOptions};

#[derive(Parser)]
#[command(name = "secfs-shell", about = "Interactive shell over a SecFs image")]
struct Args {
    /// Path of a SecFs image (formatted fresh if it doesn't exist yet).
    #[arg(default_value = "fs.img")]
    image: PathBuf,
}

/// Top-level directories the shell expects to find, created on first
/// run against a freshly formatted image.
const STARTUP_DIRS: &[&str] = &["bin", "dev", "etc", "home"];

fn main() {
    env_logger::init();
    let args = Args::parse();

    if !args.image.exists() {
        println!("secfs-shell: formatting a fresh image at {}", args.image.display());
        format::format(&args.image, DEFAULT_BLOCKS, DEFAULT_NINODES).unwrap_or_else(|e| {
            eprintln!("secfs-shell: cannot format {}: {e}", args.image.display());
            std::process::exit(1);
        });
    }

    let fs = Filesystem::mount(&args.image).unwrap_or_else(|e| {
        eprintln!("secfs-shell: cannot mount {}: {e}", args.image.display());
        std::process::exit(1);
    });

    println!("SecFs shell -- {}", args.image.display());
    for dir in STARTUP_DIRS {
        match fs.mkdir(&format!("/{dir}")) {
            Ok(()) | Err(FsError::AlreadyExists) => {}
            Err(e) => eprintln!("secfs-shell: cannot create /{dir}: {e}"),
        }
    }

    let stdin = io::stdin();
    print!("secfs> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let line = line.trim();
        if !line.is_empty() {
            if !run(&fs, line) {
                break;
            }
        }
        print!("secfs> ");
        io::stdout().flush().ok();
    }
}

/// Runs one command line. Returns `false` to end the session.
fn run(fs: &Filesystem, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let cmd = match parts.next() {
        Some(c) => c,
        None => return true,
    };
    let rest: Vec<&str> = parts.collect();

    let result = match cmd {
        "exit" | "quit" => return false,
        "ls" => cmd_ls(fs, rest.first().copied().unwrap_or(".")),
        "cd" => fs.chdir(rest.first().copied().unwrap_or("/")),
        "mkdir" => with_one_arg(&rest, "mkdir", |p| fs.mkdir(p)),
        "touch" => with_one_arg(&rest, "touch", |p| cmd_touch(fs, p)),
        "del" | "rm" => with_one_arg(&rest, "del", |p| fs.unlink(p)),
        "cat" => with_one_arg(&rest, "cat", |p| cmd_cat(fs, p)),
        "import" => cmd_import(fs, &rest),
        "testseek" => cmd_testseek(fs, &rest),
        "pwd" => {
            warn!("pwd: reserved, not yet wired to a handler");
            println!("pwd: not implemented");
            Ok(())
        }
        other => {
            println!("secfs-shell: unknown command '{other}'");
            return true;
        }
    };

    if let Err(e) = result {
        println!("error: {e}");
    }
    true
}

fn with_one_arg<'a>(rest: &[&'a str], name: &str, f: impl FnOnce(&'a str) -> Result<(), FsError>) -> Result<(), FsError> {
    match rest.first() {
        Some(&p) => f(p),
        None => {
            println!("usage: {name} <path>");
            Ok(())
        }
    }
}

fn cmd_ls(fs: &Filesystem, path: &str) -> Result<(), FsError> {
    for (name, stat) in fs.list_dir(path)? {
        let kind = match stat.typ {
            secfs::stat::T_DIR => 'd',
            secfs::stat::T_DEVICE => 'c',
            _ => '-',
        };
        println!("{kind} {:>6} {:>4} {name}", stat.size, stat.nlink);
    }
    Ok(())
}

fn cmd_touch(fs: &Filesystem, path: &str) -> Result<(), FsError> {
    let fd = fs.open(path, OpenOptions::new().read(true).write(true).create(true))?;
    fs.close(fd)
}

fn cmd_cat(fs: &Filesystem, path: &str) -> Result<(), FsError> {
    let fd = fs.open(path, OpenOptions::new().read(true))?;
    let mut buf = [0u8; 1024];
    loop {
        let n = fs.read(fd, &mut buf)?;
        if n == 0 {
            break;
        }
        io::stdout().write_all(&buf[..n]).ok();
    }
    fs.close(fd)
}

/// `import <host-path> <secfs-path>`: copies a file from the real
/// filesystem into the image.
fn cmd_import(fs: &Filesystem, rest: &[&str]) -> Result<(), FsError> {
    let (Some(&host), Some(&target)) = (rest.first(), rest.get(1)) else {
        println!("usage: import <host-path> <secfs-path>");
        return Ok(());
    };

    let mut contents = Vec::new();
    if std::fs::File::open(host)
        .and_then(|mut f| f.read_to_end(&mut contents))
        .is_err()
    {
        println!("import: cannot read {host}");
        return Ok(());
    }

    let fd = fs.open(
        target,
        OpenOptions::new().read(true).write(true).create(true).truncate(true),
    )?;
    let mut written = 0;
    while written < contents.len() {
        written += fs.write(fd, &contents[written..])?;
    }
    fs.close(fd)
}

/// `testseek <path> <offset>`: seeks and reports how many bytes are
/// readable from there, exercising the seek-to-size and seek-past-size
/// boundary behaviors by hand.
fn cmd_testseek(fs: &Filesystem, rest: &[&str]) -> Result<(), FsError> {
    let (Some(&path), Some(&off)) = (rest.first(), rest.get(1)) else {
        println!("usage: testseek <path> <offset>");
        return Ok(());
    };
    let Ok(off) = off.parse::<u64>() else {
        println!("testseek: bad offset '{off}'");
        return Ok(());
    };

    let fd = fs.open(path, OpenOptions::new().read(true))?;
    let seek_result = fs.seek(fd, off);
    match seek_result {
        Ok(pos) => {
            let mut buf = [0u8; 64];
            let n = fs.read(fd, &mut buf)?;
            println!("seeked to {pos}, read {n} byte(s)");
        }
        Err(e) => println!("seek failed: {e}"),
    }
    fs.close(fd)
}
