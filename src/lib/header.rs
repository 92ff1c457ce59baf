//! Output-header preparation.
//!
//! The output carries one @PG record for this invocation. Its PP field points
//! at the tail of the chain already present in the input header, so programs
//! that ran earlier in the pipeline stay reachable from ours.

use anyhow::Result;
use bstr::BString;
use noodles::sam::Header;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::Program;
use noodles::sam::header::record::value::map::program::tag;

/// Appends a @PG record for this invocation to the header, chained to the
/// existing program chain via PP.
///
/// # Errors
///
/// Returns an error if the program record cannot be built or added.
pub fn with_program_record(mut header: Header, version: &str, command_line: &str) -> Result<Header> {
    let (id, previous) = {
        let programs = header.programs();
        let map = programs.as_ref();

        // The chain tail is the program no other record names in its PP
        // field. Headers with a PP cycle have no tail; chain to any program
        // rather than none.
        let names_as_previous = |candidate: &[u8]| {
            map.values().any(|pg| {
                pg.other_fields()
                    .get(&tag::PREVIOUS_PROGRAM_ID)
                    .is_some_and(|pp| pp.as_slice() == candidate)
            })
        };
        let previous: Option<BString> = map
            .keys()
            .find(|id| !names_as_previous(id.as_slice()))
            .or_else(|| map.keys().next())
            .cloned();

        // Suffix the id when an earlier run already claimed it.
        let mut id = BString::from("fgdup");
        let mut n = 0u32;
        while map.contains_key(id.as_slice()) {
            n += 1;
            id = BString::from(format!("fgdup.{n}"));
        }

        (id, previous)
    };

    let mut record = Map::<Program>::builder()
        .insert(tag::NAME, "fgdup")
        .insert(tag::VERSION, version)
        .insert(tag::COMMAND_LINE, command_line);
    if let Some(previous) = &previous {
        record = record.insert(tag::PREVIOUS_PROGRAM_ID, previous.clone());
    }

    header.programs_mut().add(id, record.build()?)?;
    Ok(header)
}
