//! A stand-in engine for tests: a shell script that echoes the inline bunch of its
//! input back as a trajectory table.

use super::config::EngineConfig;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Reads the KOBJ 2 block of zgoubi.dat and writes one zgoubi.fai row per particle,
/// labelled with the tracking marker. Particles with Y (cm) above `ylimit` are lost.
const ECHO_PROGRAM: &str = r##"
BEGIN {
    print "# zgoubi.fai"
    print "# KEX, D-1, Y, T, Z, P, S, BORO, IPASS, LABEL1"
    print "# int, float, cm, mrad, cm, mrad, cm, kG.cm, int, string"
    state = 0
}
state == 0 && index($1, "OBJET") == 2 { state = 1; next }
state == 1 { boro = $1; state = 2; next }
state == 2 { if ($1 != 2) exit; state = 3; next }
state == 3 { n = $1 + 0; state = (n > 0) ? 4 : 5; next }
state == 4 {
    kex = 1
    if (ylimit != "" && ($1 + 0) > (ylimit + 0)) kex = -4
    printf "%d %.17g %s %s %s %s %s %s 1 \047trackbun  \047\n", kex, $6 - 1, $1, $2, $3, $4, $5, boro
    n--
    if (n == 0) state = 5
    next
}
"##;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FakeBehavior {
    Echo,
    /// Marks particles with Y above this many centimetres as stopped by a wall.
    LoseAboveY(f64),
    ExitCode(i32),
    Killed,
    FatalLogLine,
    NoLog,
}

pub(crate) struct FakeZgoubi {
    root: TempDir,
    pub config: EngineConfig,
}

impl FakeZgoubi {
    pub fn new(behavior: FakeBehavior) -> Self {
        let root = tempfile::tempdir().unwrap();
        let program = root.path().join("echo.awk");
        fs::write(&program, ECHO_PROGRAM).unwrap();
        let script = root.path().join("zgoubi");
        fs::write(&script, script_text(behavior, &program)).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let runs = root.path().join("runs");
        fs::create_dir(&runs).unwrap();

        let config = EngineConfig::builder()
            .zgoubi_path(script)
            .tmp_dir(runs)
            .poll_interval(Duration::from_millis(10))
            .shutdown_grace(Duration::from_millis(20))
            .max_particles_per_task(4)
            .build()
            .unwrap();
        Self { root, config }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.config.tmp_dir.clone()
    }
}

fn script_text(behavior: FakeBehavior, program: &Path) -> String {
    let ylimit = match behavior {
        FakeBehavior::LoseAboveY(limit) => limit.to_string(),
        _ => String::new(),
    };
    let log = match behavior {
        FakeBehavior::NoLog => String::new(),
        FakeBehavior::FatalLogLine => "printf ' SBR OBJ3 -> error in  reading  file zgoubi.dat\\n' > zgoubi.res\n".to_string(),
        _ => "printf ' ZGOUBI RUN COMPLETED\\n' > zgoubi.res\n".to_string(),
    };
    let tail = match behavior {
        FakeBehavior::ExitCode(code) => format!("exit {code}\n"),
        FakeBehavior::Killed => "kill -9 $$\n".to_string(),
        _ => "exit 0\n".to_string(),
    };
    format!(
        "#!/bin/sh\nawk -v ylimit=\"{ylimit}\" -f '{}' zgoubi.dat > zgoubi.fai || exit 1\n{log}{tail}",
        program.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_program_keeps_its_header_and_particle_rule() {
        assert!(ECHO_PROGRAM.contains("print \"# zgoubi.fai\""));
        assert!(ECHO_PROGRAM.contains("# KEX, D-1, Y, T, Z, P, S, BORO, IPASS, LABEL1"));
        assert!(ECHO_PROGRAM.contains("state == 4 {"));
        assert!(ECHO_PROGRAM.trim_end().ends_with('}'));
    }

    #[test]
    fn engine_script_runs_the_echo_program() {
        let fake = FakeZgoubi::new(FakeBehavior::LoseAboveY(2.5));
        let script = fs::read_to_string(&fake.config.zgoubi_path).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("-v ylimit=\"2.5\""));
        assert!(fake.root().join("echo.awk").exists());
    }
}
