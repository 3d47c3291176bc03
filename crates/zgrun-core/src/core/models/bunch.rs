use crate::core::utils::relativity;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BunchError {
    #[error("Cannot convert energy for a particle with zero rest mass")]
    ZeroMass,
    #[error("Cannot convert energy for a particle with zero charge")]
    ZeroCharge,
    #[error("CSV error in bunch file '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("File I/O error for bunch file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Bad row at line {line}: {message}")]
    BadRow { line: u64, message: String },
}

/// Phase-space coordinates of one particle, in SI units.
///
/// `d` is the relative rigidity (1 for a reference particle), `y`/`z` are transverse
/// positions (m), `t`/`p` the matching angles (rad), `s` the accumulated path length
/// (m), `tof` the time of flight (s) and `x` the longitudinal offset (m).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    pub d: f64,
    pub y: f64,
    pub t: f64,
    pub z: f64,
    pub p: f64,
    pub s: f64,
    pub tof: f64,
    pub x: f64,
}

impl Particle {
    /// A particle sitting on the reference orbit.
    pub fn reference() -> Self {
        Self {
            d: 1.0,
            ..Self::default()
        }
    }
}

/// A table of particles sharing a species and a reference rigidity.
///
/// Mass is the rest energy in eV, charge is in units of the elementary charge and
/// rigidity is in T·m. Energy is derived from the rigidity on demand.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bunch {
    particles: Vec<Particle>,
    mass: f64,
    charge: f64,
    rigidity: f64,
}

impl Bunch {
    /// Creates `n` reference particles with no rigidity set yet.
    pub fn new(n: usize, mass: f64, charge: f64) -> Self {
        Self::with_rigidity(n, 0.0, mass, charge)
    }

    pub fn with_rigidity(n: usize, rigidity: f64, mass: f64, charge: f64) -> Self {
        Self {
            particles: vec![Particle::reference(); n],
            mass,
            charge,
            rigidity,
        }
    }

    /// Creates `n` reference particles at the given kinetic energy (eV).
    ///
    /// # Errors
    ///
    /// Returns [`BunchError::ZeroMass`] or [`BunchError::ZeroCharge`] when the
    /// species cannot carry a rigidity.
    pub fn with_kinetic_energy(
        n: usize,
        ke: f64,
        mass: f64,
        charge: f64,
    ) -> Result<Self, BunchError> {
        let mut bunch = Self::new(n, mass, charge);
        bunch.set_kinetic_energy(ke)?;
        Ok(bunch)
    }

    pub fn from_particles(particles: Vec<Particle>, rigidity: f64, mass: f64, charge: f64) -> Self {
        Self {
            particles,
            mass,
            charge,
            rigidity,
        }
    }

    /// A zero-particle bunch carrying the species of `template`, if any.
    pub fn empty_like(template: Option<&Bunch>) -> Self {
        match template {
            Some(bunch) => Self::with_rigidity(0, bunch.rigidity, bunch.mass, bunch.charge),
            None => Self::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Replaces every particle row at once.
    pub fn set_particles(&mut self, particles: Vec<Particle>) {
        self.particles = particles;
    }

    pub fn into_particles(self) -> Vec<Particle> {
        self.particles
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn charge(&self) -> f64 {
        self.charge
    }

    pub fn rigidity(&self) -> f64 {
        self.rigidity
    }

    pub fn set_rigidity(&mut self, rigidity: f64) {
        self.rigidity = rigidity;
    }

    fn check_species(&self) -> Result<(), BunchError> {
        if self.mass == 0.0 {
            return Err(BunchError::ZeroMass);
        }
        if self.charge == 0.0 {
            return Err(BunchError::ZeroCharge);
        }
        Ok(())
    }

    /// Kinetic energy (eV) of the reference particle.
    pub fn kinetic_energy(&self) -> Result<f64, BunchError> {
        self.check_species()?;
        Ok(relativity::rigidity_to_ke(self.mass, self.rigidity, self.charge))
    }

    pub fn set_kinetic_energy(&mut self, ke: f64) -> Result<(), BunchError> {
        self.check_species()?;
        self.rigidity = relativity::ke_to_rigidity(self.mass, ke, self.charge);
        Ok(())
    }

    /// Rigidity of the least rigid particle, `None` for an empty bunch.
    pub fn min_rigidity(&self) -> Option<f64> {
        self.particles
            .iter()
            .map(|particle| particle.d * self.rigidity)
            .reduce(f64::min)
    }

    /// Splits the bunch into contiguous, order-preserving slices.
    ///
    /// Each slice holds at most `max_particles` rows; with enough particles the bunch is
    /// spread over roughly `n_slices` slices. Every slice shares this bunch's species
    /// and rigidity.
    pub fn split(&self, max_particles: usize, n_slices: usize) -> Vec<Bunch> {
        if self.particles.is_empty() {
            return Vec::new();
        }
        let per_slice = self.particles.len().div_ceil(n_slices.max(1));
        let chunk = per_slice.min(max_particles).max(1);
        self.particles
            .chunks(chunk)
            .map(|rows| Bunch::from_particles(rows.to_vec(), self.rigidity, self.mass, self.charge))
            .collect()
    }

    /// Replaces the particles with rows read from a YTZPSD file.
    ///
    /// Rows hold six whitespace-separated columns `Y T Z P X D`; lines starting with
    /// `#` are comments. At most `limit` rows are kept when a limit is given.
    ///
    /// # Errors
    ///
    /// Returns [`BunchError::Csv`] when the file cannot be opened or tokenized and
    /// [`BunchError::BadRow`] for rows that are not six numbers.
    pub fn read_ytzpsd(&mut self, path: &Path, limit: Option<usize>) -> Result<(), BunchError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_path(path)
            .map_err(|e| BunchError::Csv {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mut particles = Vec::new();
        for record in reader.records() {
            if limit.is_some_and(|limit| particles.len() >= limit) {
                break;
            }
            let record = record.map_err(|e| BunchError::Csv {
                path: path.to_path_buf(),
                source: e,
            })?;
            let line = record.position().map_or(0, |pos| pos.line());
            let values = record
                .iter()
                .filter(|field| !field.is_empty())
                .map(|field| {
                    field.parse::<f64>().map_err(|_| BunchError::BadRow {
                        line,
                        message: format!("'{}' is not a number", field),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            match values.as_slice() {
                [] => continue,
                [y, t, z, p, x, d] => particles.push(Particle {
                    y: *y,
                    t: *t,
                    z: *z,
                    p: *p,
                    x: *x,
                    d: *d,
                    ..Particle::default()
                }),
                other => {
                    return Err(BunchError::BadRow {
                        line,
                        message: format!("expected 6 columns (Y T Z P X D), found {}", other.len()),
                    });
                }
            }
        }
        self.particles = particles;
        Ok(())
    }

    /// Writes the particles as a YTZPSD file readable by [`Bunch::read_ytzpsd`].
    pub fn write_ytzpsd(&self, path: &Path) -> Result<(), BunchError> {
        let io_err = |e| BunchError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let csv_err = |e| BunchError::Csv {
            path: path.to_path_buf(),
            source: e,
        };

        let mut file = BufWriter::new(File::create(path).map_err(io_err)?);
        writeln!(file, "# bunch").map_err(io_err)?;
        writeln!(file, "# Y T Z P X D").map_err(io_err)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(file);
        for particle in &self.particles {
            let row = [
                particle.y, particle.t, particle.z, particle.p, particle.x, particle.d,
            ]
            .map(|value| format!("{:.18e}", value));
            writer.write_record(&row).map_err(csv_err)?;
        }
        writer.flush().map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::relativity::PROTON_MASS_EV;
    use std::io::Write;
    use tempfile::tempdir;

    fn numbered_bunch(n: usize) -> Bunch {
        let particles = (0..n)
            .map(|i| Particle {
                y: i as f64,
                ..Particle::reference()
            })
            .collect();
        Bunch::from_particles(particles, 0.5, PROTON_MASS_EV, 1.0)
    }

    #[test]
    fn new_bunch_starts_on_reference_orbit() {
        let bunch = Bunch::new(3, PROTON_MASS_EV, 1.0);
        assert_eq!(bunch.len(), 3);
        assert!(bunch.particles().iter().all(|p| *p == Particle::reference()));
    }

    #[test]
    fn kinetic_energy_round_trips_through_rigidity() {
        let bunch = Bunch::with_kinetic_energy(1, 20e6, PROTON_MASS_EV, 1.0).unwrap();
        let ke = bunch.kinetic_energy().unwrap();
        assert!((ke - 20e6).abs() < 1e-3);
    }

    #[test]
    fn energy_conversion_rejects_massless_or_neutral_species() {
        assert!(matches!(
            Bunch::with_kinetic_energy(1, 1e6, 0.0, 1.0),
            Err(BunchError::ZeroMass)
        ));
        assert!(matches!(
            Bunch::with_kinetic_energy(1, 1e6, PROTON_MASS_EV, 0.0),
            Err(BunchError::ZeroCharge)
        ));
    }

    #[test]
    fn min_rigidity_uses_the_lowest_momentum_particle() {
        let mut bunch = numbered_bunch(3);
        bunch.particles_mut()[1].d = 0.9;
        assert!((bunch.min_rigidity().unwrap() - 0.45).abs() < 1e-12);
        assert_eq!(Bunch::default().min_rigidity(), None);
    }

    #[test]
    fn split_preserves_order_and_species() {
        let bunch = numbered_bunch(10);
        let slices = bunch.split(1000, 3);
        assert_eq!(slices.iter().map(Bunch::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        let rejoined: Vec<f64> = slices
            .iter()
            .flat_map(|slice| slice.particles().iter().map(|p| p.y))
            .collect();
        assert_eq!(rejoined, (0..10).map(|i| i as f64).collect::<Vec<_>>());
        assert!(slices.iter().all(|s| s.mass() == bunch.mass() && s.rigidity() == 0.5));
    }

    #[test]
    fn split_caps_slice_size_at_max_particles() {
        let slices = numbered_bunch(10).split(3, 2);
        assert_eq!(slices.iter().map(Bunch::len).collect::<Vec<_>>(), vec![3, 3, 3, 1]);
    }

    #[test]
    fn split_of_small_bunch_never_yields_empty_slices() {
        let slices = numbered_bunch(2).split(1000, 8);
        assert_eq!(slices.len(), 2);
        assert!(Bunch::default().split(10, 4).is_empty());
    }

    #[test]
    fn ytzpsd_file_round_trips_particles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bunch.dat");
        let mut bunch = numbered_bunch(4);
        bunch.particles_mut()[2].t = -1.25e-3;
        bunch.particles_mut()[3].d = 1.01;
        bunch.write_ytzpsd(&path).unwrap();

        let mut read = Bunch::new(0, PROTON_MASS_EV, 1.0);
        read.read_ytzpsd(&path, None).unwrap();
        assert_eq!(read.len(), 4);
        for (a, b) in read.particles().iter().zip(bunch.particles()) {
            assert!((a.y - b.y).abs() < 1e-15);
            assert!((a.t - b.t).abs() < 1e-15);
            assert!((a.d - b.d).abs() < 1e-15);
        }
    }

    #[test]
    fn ytzpsd_reader_skips_comments_and_honours_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bunch.dat");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "# header").unwrap();
        writeln!(file, "0.001 0 0 0 0 1").unwrap();
        writeln!(file, "0.002  0 0 0 0 1").unwrap();
        writeln!(file, "0.003 0 0 0 0 1").unwrap();

        let mut bunch = Bunch::default();
        bunch.read_ytzpsd(&path, Some(2)).unwrap();
        assert_eq!(bunch.len(), 2);
        assert_eq!(bunch.particles()[1].y, 0.002);
    }

    #[test]
    fn ytzpsd_reader_rejects_short_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bunch.dat");
        std::fs::write(&path, "1 2 3\n").unwrap();

        let mut bunch = Bunch::default();
        let err = bunch.read_ytzpsd(&path, None).unwrap_err();
        assert!(matches!(err, BunchError::BadRow { line: 1, .. }));
    }
}
