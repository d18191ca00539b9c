/// Run one command through an aggregate in memory: decide, then apply.
///
/// No persistence or publication happens here; `CommandDispatcher` in the infra
/// crate wraps the same two steps with a store and a bus. On error the aggregate
/// is left exactly as it was.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: fieldcollect_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
