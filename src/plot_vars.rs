//! Choosing what goes into a plot file.
//!
//! Plot variables are either components of state fields, copied as
//! they are, or derived variables computed from the state (or from
//! particles) when the plot is written.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::comm::ParticipantIndex;
use crate::config::IoConfig;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::fab::BoxLayout;
use crate::fab::Fab;
use crate::fab::MultiFab;
use crate::geometry::Geometry;
use crate::geometry::IndexBox;
use crate::geometry::SPACEDIM;
use crate::schema::FieldId;
use crate::schema::IndexType;
use crate::schema::SchemaRegistry;
use crate::state::LevelState;

/// Where a derived variable gets its data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeriveSource {
    Grid,
    /// Only available when a particle subsystem is present.
    Particles,
}

/// The particle subsystem, as far as plotting cares.
pub trait ParticleSource {
    /// Number of particles in each cell of `bx` on `level`, as a one
    /// component fab over `bx`.
    fn cell_counts(&self, level: usize, bx: &IndexBox) -> Fab;
}

/// Everything a derive function may read.
pub struct DeriveInput<'a> {
    pub level: usize,
    pub geom: &'a Geometry,
    pub layout: &'a BoxLayout,
    pub state: &'a LevelState,
    pub schema: &'a SchemaRegistry,
    pub particles: Option<&'a dyn ParticleSource>,
    /// Embedded boundary volume fraction of this level, if any.
    pub volume_fraction: Option<&'a MultiFab>,
    pub me: ParticipantIndex,
}

impl<'a> DeriveInput<'a> {
    fn component(&self, name: &str) -> Result<(&'a MultiFab, usize)> {
        self.state.component(self.schema, name).ok_or_else(|| {
            SnapshotError::SchemaMismatch(format!(
                "no state component `{name}` to derive from on level {}",
                self.level
            ))
        })
    }

    /// Zeroed output on this level's layout, without ghost cells.
    pub fn output(&self, ncomp: usize) -> MultiFab {
        MultiFab::new(self.layout, ncomp, 0, self.me)
    }

    /// Compute `ncomp` outputs per valid cell from the named state
    /// components. `f` gets the inputs in the order named.
    pub fn pointwise<F>(&self, inputs: &[&str], ncomp: usize, f: F) -> Result<MultiFab>
    where
        F: Fn(&[f64], &mut [f64]),
    {
        let sources = inputs
            .iter()
            .map(|name| self.component(name))
            .collect::<Result<Vec<_>>>()?;
        let mut out = self.output(ncomp);
        let mut args = vec![0.0; inputs.len()];
        let mut values = vec![0.0; ncomp];
        for index in self.layout.owned_by(self.me) {
            let bx = self.layout.boxes()[index];
            let Some(dst) = out.fab_mut(index) else {
                continue;
            };
            for iv in bx.cells() {
                for (arg, (mf, comp)) in args.iter_mut().zip(&sources) {
                    let src = mf.fab(index).ok_or_else(|| {
                        SnapshotError::MalformedFab(format!("state lacks owned box {index}"))
                    })?;
                    *arg = src.get(&iv, *comp);
                }
                f(&args, &mut values);
                for (comp, value) in values.iter().enumerate() {
                    dst.set(&iv, comp, *value);
                }
            }
        }
        Ok(out)
    }
}

pub type DeriveFn = Box<dyn Fn(&DeriveInput<'_>) -> Result<MultiFab> + Send + Sync>;

/// A derived variable: its name in plot selections, the names of the
/// components it produces and how to compute them.
pub struct DeriveRec {
    pub name: String,
    pub var_names: Vec<String>,
    pub source: DeriveSource,
    pub func: DeriveFn,
}

impl DeriveRec {
    pub fn new(name: &str, var_names: Vec<String>, source: DeriveSource, func: DeriveFn) -> Self {
        Self {
            name: name.to_string(),
            var_names,
            source,
            func,
        }
    }

    pub fn num_derive(&self) -> usize {
        self.var_names.len()
    }

    /// Components this variable takes up in a plot file. A particle
    /// variable is one component named after the record, whatever
    /// its function produces.
    pub fn plot_ncomp(&self) -> usize {
        match self.source {
            DeriveSource::Grid => self.num_derive(),
            DeriveSource::Particles => 1,
        }
    }
}

impl std::fmt::Debug for DeriveRec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeriveRec")
            .field("name", &self.name)
            .field("var_names", &self.var_names)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Known derived variables, in plot order.
#[derive(Debug, Default)]
pub struct DeriveList {
    recs: Vec<DeriveRec>,
}

const MOMENTA: [&str; SPACEDIM] = ["xmom", "ymom", "zmom"];
const VELOCITIES: [&str; SPACEDIM] = ["x_velocity", "y_velocity", "z_velocity"];

impl DeriveList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rec: DeriveRec) {
        self.recs.push(rec);
    }

    pub fn get(&self, name: &str) -> Option<&DeriveRec> {
        self.recs.iter().find(|rec| rec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeriveRec> {
        self.recs.iter()
    }

    /// Derived variables of [`SchemaRegistry::reacting_flow`]: velocities,
    /// velocity magnitude, mass and mole fractions, volume fraction
    /// and the particle counts. Species come with their molecular
    /// weights.
    pub fn reacting_flow(species: &[(&str, f64)]) -> Self {
        let mut list = Self::new();
        for (dim, name) in VELOCITIES.iter().enumerate() {
            list.add(DeriveRec::new(
                name,
                vec![name.to_string()],
                DeriveSource::Grid,
                Box::new(move |input: &DeriveInput<'_>| {
                    input.pointwise(&[MOMENTA[dim], "density"], 1, |v, out| out[0] = v[0] / v[1])
                }),
            ));
        }
        list.add(DeriveRec::new(
            "magvel",
            vec!["magvel".to_string()],
            DeriveSource::Grid,
            Box::new(|input: &DeriveInput<'_>| {
                input.pointwise(&["density", "xmom", "ymom", "zmom"], 1, |v, out| {
                    out[0] = (v[1] * v[1] + v[2] * v[2] + v[3] * v[3]).sqrt() / v[0]
                })
            }),
        ));

        let names: Vec<String> = species.iter().map(|(name, _)| name.to_string()).collect();
        let weights: Vec<f64> = species.iter().map(|(_, weight)| *weight).collect();
        let mut partials = vec!["density".to_string()];
        partials.extend(names.iter().map(|name| format!("rho_{name}")));

        let inputs = partials.clone();
        list.add(DeriveRec::new(
            "massfrac",
            names.iter().map(|name| format!("Y({name})")).collect(),
            DeriveSource::Grid,
            Box::new(move |input: &DeriveInput<'_>| {
                let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
                input.pointwise(&inputs, inputs.len() - 1, |v, out| {
                    for (k, y) in out.iter_mut().enumerate() {
                        *y = v[k + 1] / v[0];
                    }
                })
            }),
        ));
        let inputs = partials;
        list.add(DeriveRec::new(
            "molefrac",
            names.iter().map(|name| format!("X({name})")).collect(),
            DeriveSource::Grid,
            Box::new(move |input: &DeriveInput<'_>| {
                let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
                input.pointwise(&inputs, inputs.len() - 1, |v, out| {
                    let mut total = 0.0;
                    for (k, x) in out.iter_mut().enumerate() {
                        *x = v[k + 1] / v[0] / weights[k];
                        total += *x;
                    }
                    if total > 0.0 {
                        out.iter_mut().for_each(|x| *x /= total);
                    }
                })
            }),
        ));

        list.add(DeriveRec::new(
            "vfrac",
            vec!["vfrac".to_string()],
            DeriveSource::Grid,
            Box::new(|input: &DeriveInput<'_>| {
                let mut out = input.output(1);
                match input.volume_fraction {
                    Some(vfrac) => MultiFab::copy(&mut out, vfrac, 0, 0, 1, 0)?,
                    // All fluid without embedded boundaries.
                    None => out.set_val(1.0),
                }
                Ok(out)
            }),
        ));

        for name in ["particle_count", "total_particle_count", "particle_density"] {
            list.add(DeriveRec::new(
                name,
                vec![name.to_string()],
                DeriveSource::Particles,
                Box::new(move |input: &DeriveInput<'_>| particle_derive(input, name == "particle_density")),
            ));
        }
        list
    }
}

fn particle_derive(input: &DeriveInput<'_>, per_volume: bool) -> Result<MultiFab> {
    let particles = input.particles.ok_or_else(|| {
        SnapshotError::Config("particle variables need a particle subsystem".to_string())
    })?;
    let cell_volume: f64 = input.geom.cell_size().iter().product();
    let mut out = input.output(1);
    for index in input.layout.owned_by(input.me) {
        let bx = input.layout.boxes()[index];
        let counts = particles.cell_counts(input.level, &bx);
        if let Some(dst) = out.fab_mut(index) {
            dst.copy_from(&counts, 0, 0, 1, &bx);
            if per_volume {
                dst.component_mut(0).iter_mut().for_each(|v| *v /= cell_volume);
            }
        }
    }
    Ok(out)
}

/// Names of the variables selected for plotting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotSelection {
    pub state_vars: BTreeSet<String>,
    pub derive_vars: BTreeSet<String>,
    /// State variables of the small plot file.
    pub small_state_vars: BTreeSet<String>,
}

impl PlotSelection {
    /// Every state component, no derived variables.
    pub fn all_state(schema: &SchemaRegistry) -> Self {
        Self {
            state_vars: schema
                .fields()
                .flat_map(|(_, entry)| entry.descriptor.components.iter().cloned())
                .collect(),
            ..Self::default()
        }
    }

    pub fn add_state(&mut self, name: &str) {
        self.state_vars.insert(name.to_string());
    }

    pub fn delete_state(&mut self, name: &str) {
        self.state_vars.remove(name);
    }

    pub fn add_derive(&mut self, name: &str) {
        self.derive_vars.insert(name.to_string());
    }

    pub fn delete_derive(&mut self, name: &str) {
        self.derive_vars.remove(name);
    }

    pub fn is_state(&self, name: &str) -> bool {
        self.state_vars.contains(name)
    }

    pub fn is_derive(&self, name: &str) -> bool {
        self.derive_vars.contains(name)
    }

    /// Apply the plot options of `config`.
    pub fn configure(&mut self, config: &IoConfig, species: &[&str]) {
        let plot = &config.plot;
        toggle_derive(self, "vfrac", config.plot_vfrac());
        if plot.plot_cost {
            self.add_state("WorkEstimate");
        } else {
            self.delete_state("WorkEstimate");
        }
        if !plot.plot_rhoy {
            for name in species {
                self.delete_state(&format!("rho_{name}"));
            }
        }
        toggle_derive(self, "massfrac", plot.plot_massfrac);
        toggle_derive(self, "molefrac", plot.plot_molefrac);
    }
}

fn toggle_derive(selection: &mut PlotSelection, name: &str, on: bool) {
    if on {
        selection.add_derive(name);
    } else {
        selection.delete_derive(name);
    }
}

/// The variables of one plot file, in file order: selected state
/// components in declaration order, then selected derived variables
/// in derive list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotVariableList {
    pub state: Vec<(FieldId, usize)>,
    pub derived: Vec<String>,
    names: Vec<String>,
}

impl PlotVariableList {
    /// Derived variables whose source is unavailable are left out.
    pub fn build(
        schema: &SchemaRegistry,
        derives: &DeriveList,
        selection: &PlotSelection,
        particles_present: bool,
    ) -> Self {
        let mut list = Self::state_only(schema, &selection.state_vars);
        for rec in derives.iter() {
            if !selection.is_derive(&rec.name) {
                continue;
            }
            if rec.source == DeriveSource::Particles && !particles_present {
                tracing::debug!("Skipping {} without particles", rec.name);
                continue;
            }
            list.derived.push(rec.name.clone());
            match rec.source {
                DeriveSource::Grid => list.names.extend(rec.var_names.iter().cloned()),
                DeriveSource::Particles => list.names.push(rec.name.clone()),
            }
        }
        list
    }

    /// Variables of the small plot file: state only.
    pub fn small(schema: &SchemaRegistry, selection: &PlotSelection) -> Self {
        Self::state_only(schema, &selection.small_state_vars)
    }

    fn state_only(schema: &SchemaRegistry, names: &BTreeSet<String>) -> Self {
        let mut list = Self::default();
        for (id, entry) in schema.fields() {
            if entry.descriptor.index_type != IndexType::Cell {
                continue;
            }
            for (comp, name) in entry.descriptor.components.iter().enumerate() {
                if names.contains(name) {
                    list.state.push((id, comp));
                    list.names.push(name.clone());
                }
            }
        }
        list
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ParticipantCount;
    use crate::config::PlotConfig;
    use crate::schema::FieldId;

    fn species() -> Vec<(&'static str, f64)> {
        vec![("O2", 32.0), ("N2", 28.0)]
    }

    #[test]
    fn particle_variables_need_particles() {
        let schema = SchemaRegistry::reacting_flow(&["O2", "N2"]);
        let derives = DeriveList::reacting_flow(&species());
        let mut selection = PlotSelection::default();
        selection.add_state("density");
        selection.add_derive("particle_count");
        selection.add_derive("x_velocity");

        let without = PlotVariableList::build(&schema, &derives, &selection, false);
        assert_eq!(without.names(), &["density", "x_velocity"]);

        let with = PlotVariableList::build(&schema, &derives, &selection, true);
        assert_eq!(with.names(), &["density", "x_velocity", "particle_count"]);
    }

    #[test]
    fn particle_variable_is_one_plot_component() {
        let schema = SchemaRegistry::reacting_flow(&[]);
        let mut derives = DeriveList::new();
        derives.add(DeriveRec::new(
            "particle_moments",
            vec!["m0".to_string(), "m1".to_string()],
            DeriveSource::Particles,
            Box::new(|input: &DeriveInput<'_>| Ok(input.output(2))),
        ));
        let mut selection = PlotSelection::default();
        selection.add_derive("particle_moments");

        let vars = PlotVariableList::build(&schema, &derives, &selection, true);
        assert_eq!(vars.names(), &["particle_moments"]);
        assert_eq!(derives.get("particle_moments").unwrap().plot_ncomp(), 1);
    }

    #[test]
    fn configure_applies_plot_options() {
        let schema = SchemaRegistry::reacting_flow(&["O2", "N2"]);
        let mut selection = PlotSelection::all_state(&schema);
        let config = IoConfig {
            embedded_boundary: true,
            plot: PlotConfig {
                plot_cost: false,
                plot_rhoy: false,
                plot_massfrac: true,
                ..PlotConfig::default()
            },
            ..IoConfig::default()
        };
        selection.configure(&config, &["O2", "N2"]);

        assert!(!selection.is_state("rho_O2"));
        assert!(!selection.is_state("WorkEstimate"));
        assert!(selection.is_state("Temp"));
        assert!(selection.is_derive("vfrac"));
        assert!(selection.is_derive("massfrac"));
        assert!(!selection.is_derive("molefrac"));

        let derives = DeriveList::reacting_flow(&species());
        let list = PlotVariableList::build(&schema, &derives, &selection, false);
        assert_eq!(
            list.names(),
            &[
                "density", "xmom", "ymom", "zmom", "rho_E", "rho_e", "Temp", "Y(O2)", "Y(N2)",
                "vfrac"
            ]
        );
        assert_eq!(list.state.last(), Some(&(FieldId(0), 6)));
    }

    #[test]
    fn empty_selection_gives_empty_list() {
        let schema = SchemaRegistry::reacting_flow(&[]);
        let list = PlotVariableList::build(
            &schema,
            &DeriveList::new(),
            &PlotSelection::default(),
            true,
        );
        assert!(list.is_empty());
    }

    #[test]
    fn mass_and_mole_fractions() {
        let schema = SchemaRegistry::reacting_flow(&["O2", "N2"]);
        let bx = IndexBox::new([0, 0, 0], [1, 0, 0]);
        let layout = BoxLayout::round_robin(vec![bx], ParticipantCount(1));
        let geom = Geometry::new(bx, [0.0; 3], [2.0, 1.0, 1.0]);
        let me = ParticipantIndex(0);
        let mut state = LevelState::new(0);
        let mut data = MultiFab::new(&layout, schema.primary_ncomp(), 0, me);
        if let Some(fab) = data.fab_mut(0) {
            fab.component_mut(0).fill(2.0); // density
            fab.component_mut(1).fill(4.0); // xmom
            fab.component_mut(7).fill(0.64); // rho_O2
            fab.component_mut(8).fill(1.36); // rho_N2
        }
        state
            .fields
            .insert(FieldId(0), crate::state::StateData { time: 0.0, data });
        let input = DeriveInput {
            level: 0,
            geom: &geom,
            layout: &layout,
            state: &state,
            schema: &schema,
            particles: None,
            volume_fraction: None,
            me,
        };
        let derives = DeriveList::reacting_flow(&species());

        let u = (derives.get("x_velocity").unwrap().func)(&input).unwrap();
        assert!(u.fab(0).unwrap().data().iter().all(|v| *v == 2.0));

        let y = (derives.get("massfrac").unwrap().func)(&input).unwrap();
        let y = y.fab(0).unwrap();
        assert!((y.get(&[0, 0, 0], 0) - 0.32).abs() < 1e-12);
        assert!((y.get(&[1, 0, 0], 1) - 0.68).abs() < 1e-12);

        let x = (derives.get("molefrac").unwrap().func)(&input).unwrap();
        let x = x.fab(0).unwrap();
        let (x_o2, x_n2) = (x.get(&[0, 0, 0], 0), x.get(&[0, 0, 0], 1));
        assert!((x_o2 + x_n2 - 1.0).abs() < 1e-12);
        assert!((x_o2 / x_n2 - (0.32 / 32.0) / (0.68 / 28.0)).abs() < 1e-12);

        let vfrac = (derives.get("vfrac").unwrap().func)(&input).unwrap();
        assert!(vfrac.fab(0).unwrap().data().iter().all(|v| *v == 1.0));

        assert!((derives.get("particle_density").unwrap().func)(&input).is_err());
    }
}
