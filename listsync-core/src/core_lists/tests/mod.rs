/*
    Tests for the core_lists subsystem

    Test suite covering:
    - Last-write-wins convergence of a single list (scenarios, properties)
    - Directory fetch coalescing, routing, and publication over in-memory relays
*/
