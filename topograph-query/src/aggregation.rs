// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metric aggregation for the `Aggregates()` step

use std::collections::BTreeMap;
use topograph_core::Identifier;
use topograph_storage::TimedMetric;

/// Sum a metric series into one record spanning all of it
pub fn sum_series(series: &[TimedMetric]) -> Option<TimedMetric> {
    let first = series.first()?;
    let mut total = TimedMetric {
        start: first.start,
        last: first.last,
        metric: Default::default(),
    };
    for m in series {
        total.start = total.start.min(m.start);
        total.last = total.last.max(m.last);
        total.metric += m.metric;
    }
    Some(total)
}

/// One summed record per node
pub fn aggregate_per_node(
    metrics: &BTreeMap<Identifier, Vec<TimedMetric>>,
) -> BTreeMap<Identifier, TimedMetric> {
    metrics
        .iter()
        .filter_map(|(id, series)| sum_series(series).map(|total| (id.clone(), total)))
        .collect()
}
