//! This module turns a set of plugins and their metadata into a total load order.
//!
//! Ordering constraints become directed edges in a graph, added in five phases
//! of decreasing strength: hard constraints first (master flags, declared
//! masters, requirements, load-after entries), then priority differences,
//! then record overlaps, and finally tie-breaks that make the result unique.
//! Apart from the hard constraints, an edge is only added if it wouldn't close
//! a cycle, so later phases can never contradict earlier ones.

use std::collections::HashSet;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::game::plugin::PluginData;
use crate::prelude::*;
use crate::sorting::data::PluginSortingData;
use crate::util::text::{folded_basename, iequals, normalize_filename};

/// Sorts the given plugins into a load order.
///
/// The previous load order breaks ties, so an already-sorted set of plugins
/// comes back unchanged. Fails with *CyclicInteraction* if the hard
/// constraints contradict each other.
pub fn sort_plugins<'p, P: PluginData>(
	mut plugins: Vec<PluginSortingData<'p, P>>,
	old_load_order: &[String],
) -> AppResult<Vec<String>> {
	// Sorting assumes there is at least one plugin.
	if plugins.is_empty() { return Ok(Vec::new()); }

	// Tie-break outcomes depend on vertex iteration order, as an early tie-break
	// edge can make a later candidate edge cyclic. Fixing the vertex order by
	// folded name keeps results consistent across runs and platforms.
	plugins.sort_by(|a, b| normalize_filename(a.name()).cmp(&normalize_filename(b.name())));

	let mut graph = DiGraph::new();
	for plugin in plugins {
		graph.add_node(plugin);
	}

	let mut sorter = PluginSorter { graph, old_load_order };

	info!("adding edges to the plugin graph");
	sorter.add_specific_edges();
	sorter.propagate_priorities();

	debug!("adding priority edges");
	sorter.add_priority_edges();

	debug!("adding overlap edges");
	sorter.add_overlap_edges();

	debug!("adding tie-break edges");
	sorter.add_tie_break_edges();

	debug!("checking that the graph is acyclic");
	sorter.check_for_cycles()?;

	sorter.into_sorted_names()
}

struct PluginSorter<'p, 'o, P: PluginData> {
	graph: DiGraph<PluginSortingData<'p, P>, ()>,
	old_load_order: &'o [String],
}

/// Vertex states for the cycle-detecting depth-first search.
#[derive(Clone, Copy, PartialEq)]
enum Paint {
	Fresh,
	OnStack,
	Done,
}

impl<'p, 'o, P: PluginData> PluginSorter<'p, 'o, P> {
	/// Finds the vertex for a plugin name, ignoring case.
	fn vertex_by_name(&self, name: &str) -> Option<NodeIndex> {
		self.graph
			.node_indices()
			.find(|&vertex| iequals(self.graph[vertex].name(), name))
	}

	/// Adds an edge meaning "parent loads before child", skipping duplicates.
	fn add_edge(&mut self, parent: NodeIndex, child: NodeIndex) {
		if self.graph.find_edge(parent, child).is_some() { return; }

		trace!(
			"adding edge from \"{}\" to \"{}\"",
			self.graph[parent].name(),
			self.graph[child].name(),
		);

		self.graph.add_edge(parent, child, ());
	}

	/// Returns *true* if an edge from parent to child would close a cycle,
	/// i.e. if the parent is already reachable from the child.
	fn edge_creates_cycle(&self, parent: NodeIndex, child: NodeIndex) -> bool {
		has_path_connecting(&self.graph, child, parent, None)
	}

	/// Phase 1: hard constraints. Master-flagged plugins precede the rest, and
	/// declared masters, requirements, and load-after files precede their
	/// dependents. No cycle checks here; a contradiction among these is a real
	/// error that cycle detection reports later.
	fn add_specific_edges(&mut self) {
		let vertices: Vec<_> = self.graph.node_indices().collect();

		for (position, &vertex) in vertices.iter().enumerate() {
			trace!("adding specific edges for \"{}\"", self.graph[vertex].name());

			for &other in &vertices[position + 1..] {
				if self.graph[vertex].is_master() == self.graph[other].is_master() {
					continue;
				}

				match self.graph[other].is_master() {
					true => self.add_edge(other, vertex),
					false => self.add_edge(vertex, other),
				}
			}

			let masters: Vec<String> = self.graph[vertex].masters().to_vec();
			let requirements: Vec<String> = self.graph[vertex]
				.requirements()
				.iter()
				.map(|file| file.name.clone())
				.collect();
			let load_after: Vec<String> = self.graph[vertex]
				.load_after()
				.iter()
				.map(|file| file.name.clone())
				.collect();

			for name in masters.iter().chain(&requirements).chain(&load_after) {
				if let Some(parent) = self.vertex_by_name(name) {
					self.add_edge(parent, vertex);
				}
			}
		}
	}

	/// Phase 2: priority propagation. A plugin's priority is inherited by
	/// everything that loads after it, until a plugin already carrying an
	/// equal-or-greater value stops the descent.
	fn propagate_priorities(&mut self) {
		let mut prioritized: Vec<NodeIndex> = self.graph
			.node_indices()
			.filter(|&vertex| self.graph[vertex].has_nonzero_priority())
			.collect();

		// Visiting in decreasing priority order keeps every update monotone.
		prioritized.sort_by(|&a, &b| {
			let a_key = (self.graph[a].global_priority(), self.graph[a].local_priority());
			let b_key = (self.graph[b].global_priority(), self.graph[b].local_priority());

			b_key.cmp(&a_key)
		});

		for root in prioritized {
			let root_local = self.graph[root].local_priority();
			let root_global = self.graph[root].global_priority();

			trace!(
				"propagating priorities ({}, {}) from \"{}\"",
				root_global.value(),
				root_local.value(),
				self.graph[root].name(),
			);

			let mut visited = HashSet::new();
			let mut pending: Vec<NodeIndex> = self.graph.neighbors(root).collect();

			while let Some(vertex) = pending.pop() {
				if vertex == root || !visited.insert(vertex) { continue; }

				let descendant = &mut self.graph[vertex];

				if descendant.local_priority() < root_local {
					descendant.set_local_priority(root_local);
				} else if descendant.global_priority() < root_global {
					descendant.set_global_priority(root_global);
				} else {
					// Already carries an equal-or-greater priority; stop here.
					continue;
				}

				pending.extend(self.graph.neighbors(vertex));
			}
		}
	}

	/// Phase 3: priority edges. Lower-priority plugins load before
	/// higher-priority ones, with the global value dominating the local one.
	fn add_priority_edges(&mut self) {
		let vertices: Vec<_> = self.graph.node_indices().collect();

		for &vertex in &vertices {
			trace!("adding priority edges for \"{}\"", self.graph[vertex].name());

			// A plugin with no global priority and no override records can only
			// conflict with plugins that override the records it adds, and any
			// edge needed for that is added when the other plugin is evaluated.
			if self.graph[vertex].global_priority().value() == 0
				&& self.graph[vertex].override_record_count() == 0
				&& !self.graph[vertex].loads_archive()
			{
				continue;
			}

			for &other in &vertices {
				if vertex == other { continue; }

				let ours = (self.graph[vertex].global_priority(), self.graph[vertex].local_priority());
				let theirs = (self.graph[other].global_priority(), self.graph[other].local_priority());

				if ours == theirs { continue; }

				// Purely local differences only matter between conflicting plugins.
				if ours.0.value() == 0
					&& theirs.0.value() == 0
					&& !self.graph[vertex].overlaps_with(&self.graph[other])
				{
					continue;
				}

				let (parent, child) = match ours < theirs {
					true => (vertex, other),
					false => (other, vertex),
				};

				if !self.edge_creates_cycle(parent, child) {
					self.add_edge(parent, child);
				}
			}
		}
	}

	/// Phase 4: overlap edges. When two plugins override a common record, the
	/// one overriding more records loads first, so the more specific plugin
	/// gets the last word.
	fn add_overlap_edges(&mut self) {
		let vertices: Vec<_> = self.graph.node_indices().collect();

		for &vertex in &vertices {
			let overrides = self.graph[vertex].override_record_count();

			if overrides == 0 {
				trace!(
					"skipping \"{}\": the plugin contains no override records",
					self.graph[vertex].name(),
				);
				continue;
			}

			for &other in &vertices {
				if vertex == other
					|| self.graph.find_edge(vertex, other).is_some()
					|| self.graph.find_edge(other, vertex).is_some()
					|| overrides == self.graph[other].override_record_count()
					|| !self.graph[vertex].overlaps_with(&self.graph[other])
				{
					continue;
				}

				let (parent, child) = match overrides > self.graph[other].override_record_count() {
					true => (vertex, other),
					false => (other, vertex),
				};

				if !self.edge_creates_cycle(parent, child) {
					self.add_edge(parent, child);
				}
			}
		}
	}

	/// Phase 5: tie-break edges. Linking every still-unordered pair makes the
	/// topological order unique, with the previous load order deciding the
	/// direction wherever it can.
	fn add_tie_break_edges(&mut self) {
		let pairs: Vec<(NodeIndex, NodeIndex)> =
			self.graph.node_indices().tuple_combinations().collect();

		for (vertex, other) in pairs {
			if self.graph.find_edge(vertex, other).is_some()
				|| self.graph.find_edge(other, vertex).is_some()
			{
				continue;
			}

			let ordering = self.compare_plugins(
				self.graph[vertex].name(),
				self.graph[other].name(),
			);

			let (parent, child) = match ordering == std::cmp::Ordering::Less {
				true => (vertex, other),
				false => (other, vertex),
			};

			if !self.edge_creates_cycle(parent, child) {
				self.add_edge(parent, child);
			}
		}
	}

	/// Decides which of two unrelated plugins should load first.
	///
	/// A plugin present in the previous load order beats one that isn't; two
	/// present plugins keep their old relative order; otherwise folded basenames
	/// decide, with the full filename as the last resort.
	fn compare_plugins(&self, first: &str, second: &str) -> std::cmp::Ordering {
		let position_of = |name: &str| {
			self.old_load_order.iter().position(|entry| iequals(entry, name))
		};

		match (position_of(first), position_of(second)) {
			(Some(_), None) => std::cmp::Ordering::Less,
			(None, Some(_)) => std::cmp::Ordering::Greater,
			(Some(a), Some(b)) => a.cmp(&b),

			(None, None) => folded_basename(first)
				.cmp(&folded_basename(second))
				.then_with(|| first.cmp(second)),
		}
	}

	/// Searches the whole graph for cycles, reconstructing the offending trail.
	fn check_for_cycles(&self) -> AppResult<()> {
		let mut paint = vec![Paint::Fresh; self.graph.node_count()];
		let mut trail: Vec<String> = Vec::new();

		for vertex in self.graph.node_indices() {
			if paint[vertex.index()] == Paint::Fresh {
				self.visit(vertex, &mut paint, &mut trail)?;
			}
		}

		Ok(())
	}

	fn visit(
		&self,
		vertex: NodeIndex,
		paint: &mut Vec<Paint>,
		trail: &mut Vec<String>,
	) -> AppResult<()> {
		paint[vertex.index()] = Paint::OnStack;

		for next in self.graph.neighbors(vertex) {
			match paint[next.index()] {
				Paint::Fresh => {
					let name = self.graph[vertex].name();

					// Drop any stale tail; it doesn't contribute to a forward cycle.
					if let Some(position) = trail.iter().position(|entry| entry == name) {
						trail.truncate(position);
					}

					trail.push(name.to_owned());
					self.visit(next, paint, trail)?;
				}

				Paint::OnStack => {
					let source = self.graph[vertex].name().to_owned();
					let target = self.graph[next].name().to_owned();

					trail.push(source.clone());
					let start = trail.iter().position(|entry| *entry == target).unwrap_or(0);

					return Err(AppError::CyclicInteraction {
						from: source,
						target,
						trail: trail[start..].to_vec(),
					});
				}

				Paint::Done => {}
			}
		}

		paint[vertex.index()] = Paint::Done;
		Ok(())
	}

	/// Emits the final order by topological sort.
	fn into_sorted_names(self) -> AppResult<Vec<String>> {
		debug!("performing a topological sort");

		let sorted = toposort(&self.graph, None)
			.map_err(|_| AppError::Logic("the plugin graph is cyclic after cycle checks".into()))?;

		// With tie-break edges in place the path should be Hamiltonian; a gap
		// means the order is not uniquely determined.
		for (&vertex, &next) in sorted.iter().tuple_windows() {
			if self.graph.find_edge(vertex, next).is_none() {
				warn!(
					"the load order between \"{}\" and \"{}\" is not uniquely determined",
					self.graph[vertex].name(),
					self.graph[next].name(),
				);
			}
		}

		let names = sorted.into_iter()
			.map(|vertex| self.graph[vertex].name().to_owned())
			.collect();

		info!("calculated load order: {names:?}");
		Ok(names)
	}
}
