use anyhow::Context;
use lrun::cgroup::{Cgroup, Ownership, Subsys};
use lrun::lock::CgroupLock;
use lrun::{config, supervisor};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut config = lrun::cli::parse();

    config::check_environment(&config).context("lrun")?;

    log::info!(
        "lrun {} pid = {}",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );

    let (name, ownership) = match &config.cgname {
        Some(name) => (name.clone(), Ownership::Borrowed),
        None => (format!("lrun{}", std::process::id()), Ownership::Owned),
    };
    let mut cg = Cgroup::create(&name, ownership).context("lrun")?;

    // serialize with other supervisors sharing this cgroup name
    let _lock = CgroupLock::acquire(&cg.subsys_path(Subsys::Cpu)).context("lrun")?;

    supervisor::setup_cgroup(&cg, &mut config);
    let ret = supervisor::run(&mut cg, &config);
    supervisor::clean_exit(&cg, ret)
}
