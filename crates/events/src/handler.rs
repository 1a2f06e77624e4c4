/// Execute an aggregate command in place: decide, then apply each event.
///
/// No persistence or publication happens here; the infra dispatcher does that.
/// Mostly useful in domain tests and for staging several commands against one
/// loaded aggregate.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: fieldstock_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
