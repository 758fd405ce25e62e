mod cli;

use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use block_dev::BlockDevice;
use clap::Parser;
use cli::{Cli, Command};
use sector_fs::{DIRECTORY_SECTOR, FileSystem, FormatOptions, FsError};
use sector_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Command::Format {
        sectors,
        dir_entries,
    } = cli.command
    {
        let block_file: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(&cli.image, sectors)?);
        let fs = FileSystem::format(
            block_file,
            FormatOptions {
                num_sectors: sectors,
                dir_entries,
            },
        )
        .map_err(io::Error::other)?;
        println!("{:?}: {sectors} sectors, {} free", cli.image, fs.num_clear());
        return Ok(());
    }

    let block_file: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(&cli.image)?);
    let fs = FileSystem::mount(block_file);
    run(&fs, cli.command).map_err(io::Error::other)
}

fn run(fs: &Arc<FileSystem>, command: Command) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match command {
        Command::Format { .. } => unreachable!("handled before mounting"),
        Command::Put { sources, dir } => {
            let target = match dir {
                Some(dir) => fs.change_dir(&dir, DIRECTORY_SECTOR)?,
                None => DIRECTORY_SECTOR,
            };
            for source in sources {
                let name = source
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or(FsError::InvalidName)?;
                let data = fs::read(&source)?;

                fs.create(name, data.len(), target)?;
                let mut file = fs.open(name, target)?;
                let written = file.write_at(&data, 0);
                log::info!("put {source:?} as {name:?}, {written} bytes");
            }
        }
        Command::Cat { path } => {
            let mut file = fs.open(&path, DIRECTORY_SECTOR)?;
            let mut data = vec![0; file.length()];
            file.read(&mut data);
            io::stdout().write_all(&data)?;
        }
        Command::Mkdir { path } => fs.make_dir(&path, 0, DIRECTORY_SECTOR)?,
        Command::Ls { path } => {
            let sector = match path {
                Some(path) => fs.change_dir(&path, DIRECTORY_SECTOR)?,
                None => DIRECTORY_SECTOR,
            };
            for entry in fs.list(sector) {
                let suffix = if entry.is_dir { "/" } else { "" };
                println!("{:indent$}{}{suffix}", "", entry.name, indent = 2 * entry.depth);
            }
        }
        Command::Rm { path } => fs.remove(&path, DIRECTORY_SECTOR)?,
        Command::Dump => {
            let mut out = String::new();
            fs.print(&mut out)?;
            print!("{out}");
        }
    }
    Ok(())
}
