use esp_filtered_interrupt::sim::SimPlatform;
use esp_filtered_interrupt::{FilteredInterrupt, InterruptConfig, NO_WAIT};

const BUTTON: i32 = 4;

fn main() {
    println!("Filtered button example!");

    let sim = SimPlatform::new();
    let registry = sim.clone().leak_registry();

    // active low button with pull-up, slow press and fast release
    let button = FilteredInterrupt::new(
        registry,
        BUTTON,
        InterruptConfig::new()
            .go_high(20)
            .go_low(5)
            .pull_up(true)
            .inverse_logic(true),
    )
    .unwrap();

    // seed with a short glitch, then press with contact bounce and release
    sim.set_level(BUTTON, false);
    sim.settle();
    sim.set_level(BUTTON, true);
    sim.settle();

    for level in [false, true, false, true, false] {
        sim.set_level(BUTTON, level);
        sim.settle();
        sim.advance(2);
    }
    sim.advance(30);

    sim.set_level(BUTTON, true);
    sim.settle();
    sim.advance(10);

    println!(
        "{} transitions pending, {} redundant",
        button.pending_interrupts(),
        button.redundant_interrupts()
    );
    while button.wait_for_single_interrupt(NO_WAIT) {
        println!("button is now {}", button.state());
    }
    println!("button settled {}", button.last_state());
}
