// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

use crate::models::RankingInputs;
use prettytable::{cell, format::consts::FORMAT_NO_LINESEP, row, table, Table};
use std::collections::HashMap;

pub trait Entity {
    type Id;

    fn get_id(&self) -> Self::Id;
    fn get_data(&self) -> HashMap<String, String> {
        Default::default()
    }
}

pub trait ToTable {
    fn to_table(&self) -> Table;
}

impl<I: ToString, E: Entity<Id = I>> ToTable for E {
    fn to_table(&self) -> Table {
        let mut table = table![["id", self.get_id()]];

        let mut data: Vec<_> = self.get_data().into_iter().collect();
        data.sort();
        for (key, val) in data {
            table.add_row(row![key, val]);
        }

        table.set_format(*FORMAT_NO_LINESEP);
        table
    }
}

impl ToTable for RankingInputs {
    fn to_table(&self) -> Table {
        let last_review = self
            .last_review_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".into());

        let mut table = table![
            ["average_rating", self.average_rating],
            ["total_likes", self.total_likes],
            ["total_dislikes", self.total_dislikes],
            ["last_review_at", last_review]
        ];

        table.set_format(*FORMAT_NO_LINESEP);
        table
    }
}
