//! Schema-less Coding: Built-in Grammars, Pool und Grammar-Lernen
//! (EXI 1.0 §8.4.3).

use std::rc::Rc;

use exigram::bitstream::{BitReader, BitWriter};
use exigram::grammar::{EventType, Grammar, ELEMENT_CONTENT, START_TAG_CONTENT};
use exigram::stream::{ExiStream, Step};
use exigram::{decode, encode, EventCollector, ExiEvent, ExiOptions, Preserve, QName};

fn encode_with(stream: &mut ExiStream, events: &[ExiEvent]) -> Vec<u8> {
    let mut w = BitWriter::new();
    for e in events {
        stream.encode_event(&mut w, e).unwrap_or_else(|err| panic!("{e:?}: {err}"));
    }
    w.into_vec()
}

fn decode_with(stream: &mut ExiStream, data: &[u8]) -> Vec<ExiEvent> {
    let mut r = BitReader::new(data);
    let mut collector = EventCollector::new();
    while stream.process_next_production(&mut r, &mut collector).unwrap() == Step::Continue {}
    collector.into_events()
}

fn shape(g: &Grammar, nt: u16) -> Vec<(EventType, Vec<u32>)> {
    g.productions_of(nt).iter().map(|p| (p.event_type, p.code.parts().to_vec())).collect()
}

fn grammar_of<'a>(stream: &'a ExiStream, name: &str) -> &'a Grammar {
    let q = stream.tables().lookup_qname("", name).expect("qname");
    stream.pool().get(q).expect("pooled grammar")
}

/// Kleiner deterministischer Generator für Dokumente mit Wiederholungen.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

fn random_document(seed: u64, names: &[&str]) -> Vec<ExiEvent> {
    let mut rng = Lcg(seed);
    let mut events = vec![ExiEvent::StartDocument, ExiEvent::start("root")];
    let mut depth = 0;
    for _ in 0..200 {
        match rng.next(4) {
            0 | 1 if depth < 6 => {
                events.push(ExiEvent::start(names[rng.next(names.len() as u64) as usize]));
                depth += 1;
            }
            2 => events.push(ExiEvent::text(&format!("v{}", rng.next(5)))),
            _ if depth > 0 => {
                events.push(ExiEvent::EndElement);
                depth -= 1;
            }
            _ => {}
        }
    }
    events.extend(std::iter::repeat_n(ExiEvent::EndElement, depth + 1));
    events.push(ExiEvent::EndDocument);
    events
}

// ============================================================================
// Form der Built-in Grammar
// ============================================================================

#[test]
fn first_unknown_element_gets_fixed_shape() {
    let mut stream = ExiStream::new(ExiOptions::default(), None).unwrap();
    encode_with(&mut stream, &[ExiEvent::StartDocument, ExiEvent::start("x")]);
    assert_eq!(stream.pool().len(), 1);

    let g = grammar_of(&stream, "x");
    assert_eq!(
        shape(g, START_TAG_CONTENT),
        [
            (EventType::EndElement, vec![0, 0]),
            (EventType::AttributeAll, vec![0, 1]),
            (EventType::StartElementAll, vec![0, 2]),
            (EventType::Characters, vec![0, 3]),
        ]
    );
    assert_eq!(
        shape(g, ELEMENT_CONTENT),
        [
            (EventType::EndElement, vec![0]),
            (EventType::StartElementAll, vec![1, 0]),
            (EventType::Characters, vec![1, 1]),
        ]
    );
}

#[test]
fn preserve_options_widen_the_shape() {
    let opts = ExiOptions::default().with_preserve(Preserve { comments: true, ..Preserve::default() });
    let mut stream = ExiStream::new(opts, None).unwrap();
    encode_with(&mut stream, &[ExiEvent::StartDocument, ExiEvent::start("x")]);
    let g = grammar_of(&stream, "x");
    let stc: Vec<EventType> = shape(g, START_TAG_CONTENT).into_iter().map(|(e, _)| e).collect();
    assert_eq!(
        stc,
        [
            EventType::EndElement,
            EventType::AttributeAll,
            EventType::NamespaceDeclaration,
            EventType::SelfContained,
            EventType::StartElementAll,
            EventType::Characters,
            EventType::EntityReference,
            EventType::Comment,
            EventType::ProcessingInstruction,
        ]
    );
    assert_eq!(g.productions_of(ELEMENT_CONTENT).len(), 6);
}

// ============================================================================
// Lernen
// ============================================================================

/// Das zweite Vorkommen nutzt die gelernte SE(qname) Production statt SE(*).
#[test]
fn second_occurrence_reuses_learned_grammar() {
    let events = vec![
        ExiEvent::StartDocument,
        ExiEvent::start("r"),
        ExiEvent::start("item"),
        ExiEvent::text("a"),
        ExiEvent::EndElement,
        ExiEvent::start("item"),
        ExiEvent::text("b"),
        ExiEvent::EndElement,
        ExiEvent::EndElement,
        ExiEvent::EndDocument,
    ];
    let mut stream = ExiStream::new(ExiOptions::default(), None).unwrap();
    encode_with(&mut stream, &events);

    let item = stream.tables().lookup_qname("", "item").unwrap();
    let r = grammar_of(&stream, "r");
    let learned: Vec<_> = r
        .productions_of(ELEMENT_CONTENT)
        .iter()
        .filter(|p| p.event_type == EventType::StartElementQName)
        .collect();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].qname, Some(item));
    assert_eq!(learned[0].code.parts(), [0]);

    // CH wurde in StartTagContent von item gelernt, genau einmal
    let item_g = grammar_of(&stream, "item");
    let ch = item_g.productions_of(START_TAG_CONTENT).iter().filter(|p| p.event_type == EventType::Characters).count();
    assert_eq!(ch, 2, "gelerntes CH plus CH 0.x");
}

/// CH nach einem Kind-Element wird in ElementContent gelernt; das zweite
/// SE(i) danach landet wieder auf Code 0.
#[test]
fn text_after_child_learned_in_element_content() {
    let events = vec![
        ExiEvent::StartDocument,
        ExiEvent::start("p"),
        ExiEvent::start("i"),
        ExiEvent::EndElement,
        ExiEvent::text("y"),
        ExiEvent::start("i"),
        ExiEvent::EndElement,
        ExiEvent::text("z"),
        ExiEvent::EndElement,
        ExiEvent::EndDocument,
    ];
    let mut encoder = ExiStream::new(ExiOptions::default(), None).unwrap();
    let data = encode_with(&mut encoder, &events);

    let p = grammar_of(&encoder, "p");
    assert_eq!(
        shape(p, ELEMENT_CONTENT),
        [
            (EventType::StartElementQName, vec![0]),
            (EventType::Characters, vec![1]),
            (EventType::EndElement, vec![2]),
            (EventType::StartElementAll, vec![3, 0]),
            (EventType::Characters, vec![3, 1]),
        ]
    );

    let mut decoder = ExiStream::new(ExiOptions::default(), None).unwrap();
    assert_eq!(decode_with(&mut decoder, &data), events);
    assert_eq!(grammar_of(&decoder, "p"), p);
}

/// Fragment ohne Schema mit wiederholten Namen: Encoder und Decoder lernen gleich.
#[test]
fn fragment_learns_top_level_names() {
    let opts = ExiOptions::default().with_fragment();
    let mut events = vec![ExiEvent::StartDocument];
    for name in ["a", "b", "a", "a", "b"] {
        events.extend([ExiEvent::start(name), ExiEvent::EndElement]);
    }
    events.push(ExiEvent::EndDocument);

    let bytes = encode(&events, &opts, None).unwrap();
    assert_eq!(decode(&bytes, None).unwrap(), events);

    let mut encoder = ExiStream::new(opts.clone(), None).unwrap();
    let body = encode_with(&mut encoder, &events);
    let mut decoder = ExiStream::new(opts, None).unwrap();
    assert_eq!(decode_with(&mut decoder, &body), events);
    assert_eq!(decoder.pool().len(), 2);
}

#[test]
fn pool_holds_one_grammar_per_distinct_qname() {
    let names = ["a", "b", "c", "d", "e"];
    for seed in 1..=25 {
        let events = random_document(seed, &names);
        let mut encoder = ExiStream::new(ExiOptions::default(), None).unwrap();
        let data = encode_with(&mut encoder, &events);

        let distinct: std::collections::HashSet<&QName> = events
            .iter()
            .filter_map(|e| match e {
                ExiEvent::StartElement(q) => Some(q.as_ref()),
                _ => None,
            })
            .collect();
        assert_eq!(encoder.pool().len(), distinct.len(), "seed {seed}");

        // Der Decoder lernt exakt dieselben Grammars
        let mut decoder = ExiStream::new(ExiOptions::default(), None).unwrap();
        assert_eq!(decode_with(&mut decoder, &data), events, "seed {seed}");
        assert_eq!(decoder.pool().len(), encoder.pool().len());
        for ((qa, ga), (qb, gb)) in encoder.pool().iter().zip(decoder.pool().iter()) {
            assert_eq!(qa, qb);
            assert_eq!(ga, gb, "seed {seed}, {qa}");
        }
    }
}

/// Weitere Vorkommen ändern eine einmal gelernte Grammar nicht mehr.
#[test]
fn learning_reaches_a_fixed_point() {
    let once = vec![
        ExiEvent::StartDocument,
        ExiEvent::start("r"),
        ExiEvent::attribute("k", "1"),
        ExiEvent::start("c"),
        ExiEvent::EndElement,
        ExiEvent::EndElement,
        ExiEvent::EndDocument,
    ];
    let twice = vec![
        ExiEvent::StartDocument,
        ExiEvent::start("r"),
        ExiEvent::attribute("k", "1"),
        ExiEvent::start("c"),
        ExiEvent::EndElement,
        ExiEvent::start("c"),
        ExiEvent::EndElement,
        ExiEvent::EndElement,
        ExiEvent::EndDocument,
    ];

    let mut s1 = ExiStream::new(ExiOptions::default(), None).unwrap();
    encode_with(&mut s1, &once);
    let mut s2 = ExiStream::new(ExiOptions::default(), None).unwrap();
    encode_with(&mut s2, &twice);

    // c: das zweite leere Vorkommen nutzt das gelernte EE
    assert_eq!(grammar_of(&s1, "c"), grammar_of(&s2, "c"));
    let r1 = grammar_of(&s1, "r").productions_of(START_TAG_CONTENT).len();
    let r2 = grammar_of(&s2, "r").productions_of(START_TAG_CONTENT).len();
    assert_eq!(r1, r2);
}

#[test]
fn namespaced_and_unnamespaced_names_are_distinct() {
    let events = vec![
        ExiEvent::StartDocument,
        ExiEvent::start("r"),
        ExiEvent::StartElement(Rc::new(QName::new("urn:a", "x"))),
        ExiEvent::EndElement,
        ExiEvent::StartElement(Rc::new(QName::new("urn:b", "x"))),
        ExiEvent::EndElement,
        ExiEvent::start("x"),
        ExiEvent::EndElement,
        ExiEvent::EndElement,
        ExiEvent::EndDocument,
    ];
    let mut stream = ExiStream::new(ExiOptions::default(), None).unwrap();
    encode_with(&mut stream, &events);
    assert_eq!(stream.pool().len(), 4);

    let bytes = encode(&events, &ExiOptions::default(), None).unwrap();
    let decoded = decode(&bytes, None).unwrap();
    assert_eq!(decoded, events);
    let ExiEvent::StartElement(q) = &decoded[4] else { panic!() };
    assert_eq!(&*q.uri, "urn:b");
}
