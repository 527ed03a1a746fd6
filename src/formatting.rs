//! formatting prints out tables nicely.

use anyhow::Result;
use crate::temp_table::TempTable;

/// Printing out tables nicely.
/// In the future, also csv output, etc.
pub fn print_temp_table(tt: &TempTable, detailed: bool) -> Result<()> {
    println!(
        "   | {} |",
        tt.column_names
            .iter()
            .map(|x| format!("{:15}", x))
            .collect::<Vec<String>>()
            .join(" | ")
    );
    if detailed {
        println!(
            "   | {} |",
            tt.column_types
                .iter()
                .map(|x| format!("{:15}", x))
                .collect::<Vec<String>>()
                .join(" | ")
        );
    }
    for row in tt.rows.iter() {
        println!(
            "   | {} |",
            row.items
                .iter()
                .map(|x| format!("{:15}", x))
                .collect::<Vec<String>>()
                .join(" | ")
        );
    }
    Ok(())
}
