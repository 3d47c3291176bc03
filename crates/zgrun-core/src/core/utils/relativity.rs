//! Relativistic conversions between kinetic energy and magnetic rigidity.
//!
//! Energies and masses are in eV (masses as rest energy, eV/c²), charges in units of
//! the elementary charge and rigidities in T·m.

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Elementary charge, C.
pub const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;

/// Proton rest energy, eV.
pub const PROTON_MASS_EV: f64 = 938.272_088_16e6;

/// Electron rest energy, eV.
pub const ELECTRON_MASS_EV: f64 = 0.510_998_950_00e6;

/// Momentum times c (eV) of a particle with the given rest energy and kinetic energy.
pub fn ke_to_momentum(mass: f64, ke: f64) -> f64 {
    let total = ke + mass;
    (total * total - mass * mass).sqrt()
}

/// Kinetic energy (eV) of a particle with the given rest energy and momentum times c.
pub fn momentum_to_ke(mass: f64, pc: f64) -> f64 {
    (pc * pc + mass * mass).sqrt() - mass
}

/// Magnetic rigidity (T·m) of a particle of the given kinetic energy.
pub fn ke_to_rigidity(mass: f64, ke: f64, charge: f64) -> f64 {
    ke_to_momentum(mass, ke) / (SPEED_OF_LIGHT * charge.abs())
}

/// Kinetic energy (eV) of a particle with the given magnetic rigidity.
pub fn rigidity_to_ke(mass: f64, rigidity: f64, charge: f64) -> f64 {
    momentum_to_ke(mass, rigidity * SPEED_OF_LIGHT * charge.abs())
}
