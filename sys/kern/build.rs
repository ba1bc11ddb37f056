// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use build_kconfig::SchedConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    generate_kconfig()?;
    Ok(())
}

fn generate_kconfig() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=SCHED_KCONFIG");
    let kconfig: SchedConfig = match env::var("SCHED_KCONFIG") {
        Ok(text) => ron::de::from_str(&text)?,
        Err(env::VarError::NotPresent) => SchedConfig::default(),
        Err(e) => return Err(e.into()),
    };
    kconfig.validate()?;

    let out = &PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR unset")?);
    let mut file = File::create(out.join("kconfig.rs"))?;

    writeln!(file, "// See build.rs for details")?;
    writeln!(
        file,
        "/// Number of CPUs with their own ready queues.\n\
         pub const MAX_CPUS: usize = {};",
        kconfig.max_cpus
    )?;
    writeln!(
        file,
        "/// Priority of a freshly constructed scheduling context.\n\
         pub const DEFAULT_PRIO: u8 = {};",
        kconfig.default_prio
    )?;
    writeln!(
        file,
        "/// Quantum given to contexts that don't ask for one.\n\
         pub const DEFAULT_TIME_SLICE: u64 = {};",
        kconfig.default_time_slice
    )?;
    writeln!(
        file,
        "/// Capacity of each CPU's WFQ heap.\n\
         pub const WFQ_HEAP_SLOTS: usize = {};",
        kconfig.wfq_heap_slots
    )?;

    Ok(())
}
