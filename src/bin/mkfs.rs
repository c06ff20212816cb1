//! 创建文件系统映像，并把宿主机上的文件复制到根目录

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use xv6_fs::consts::fs::{FSSIZE, LOGSIZE, MAX_DIR_SIZE, NINODES, ROOTDEV};
use xv6_fs::driver::FileDisk;
use xv6_fs::{mkfs, File, FileSystem, MkfsParams, OpenFlags};

#[derive(Parser)]
#[command(about = "Create an xv6 file system image")]
struct Cli {
    /// Image file to create (truncated if it exists)
    image: PathBuf,

    /// Total number of blocks
    #[arg(long, default_value_t = FSSIZE)]
    size: u32,

    /// Number of inodes
    #[arg(long, default_value_t = NINODES)]
    inodes: u32,

    /// Host files copied into the root directory; a leading '_' is dropped from the name
    files: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    let params = MkfsParams {
        size: args.size,
        ninodes: args.inodes,
        nlog: LOGSIZE as u32,
    };
    let disk = Arc::new(FileDisk::create(&args.image, params.size)?);
    let sb = mkfs(disk.as_ref(), &params)?;
    println!(
        "nmeta {} (boot, super, log blocks {} inode blocks {}, bitmap blocks {}) blocks {} total {}",
        sb.size - sb.nblocks,
        sb.nlog,
        sb.bmapstart - sb.inodestart,
        sb.size - sb.nblocks - sb.bmapstart,
        sb.nblocks,
        sb.size
    );

    let fs = FileSystem::mount(ROOTDEV, disk)?;
    for path in &args.files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("{}: not a valid file name", path.display()))?;
        let name = name.strip_prefix('_').unwrap_or(name);
        if name.is_empty() || name.len() > MAX_DIR_SIZE {
            return Err(format!("{}: name must be 1 to {} bytes", path.display(), MAX_DIR_SIZE).into());
        }

        let content = std::fs::read(path)?;
        let file = File::open(&fs, &format!("/{}", name), None, OpenFlags::CREATE | OpenFlags::WRONLY)?;
        let written = file.write(&content)?;
        if written != content.len() {
            return Err(format!("{}: only {} of {} bytes fit", path.display(), written, content.len()).into());
        }
        println!("{}: {} bytes", name, written);
    }

    Ok(())
}
